#[doc(hidden)]
#[macro_export]
macro_rules! atomize_bootstrap {
    ($staging:ident $sym:ident : $val:expr) => {
        let $sym = $staging.atomize_str($val)?;
    };
    ($staging:ident $sym:ident) => {
        let $sym = $staging.atomize_str(stringify!($sym))?;
    };
}

/// Defines a struct of named permanent atoms, built in one pass over the
/// bootstrap staging set.
#[macro_export]
macro_rules! define_atom_set {
    (
        $(#[$($meta:meta)*])?
        $name:ident => [$($sym:ident$(: $val:expr)?),* $(,)?]
    ) => {
        mod inner {
            #![allow(non_snake_case)]
            use super::*;

            use $crate::atom::AtomId;
            use $crate::error::AtomError;
            use $crate::permanent::PermanentStaging;

            $(#[$($meta)*])?
            pub struct $name {
                $(pub $sym: AtomId),*
            }
            impl $name {
                pub fn new(staging: &mut PermanentStaging) -> Result<Self, AtomError> {
                    $($crate::atomize_bootstrap!(staging $sym $(: $val)?);)*

                    Ok(Self {
                        $($sym),*
                    })
                }
            }
        }
        pub use inner::*;
    };
}

define_atom_set! {
    /// Well-known property names, prototype class names and well-known symbol descriptions, preinterned during bootstrap and addressable as fields.
    CommonNames => [
        empty: "",
        prototype,
        constructor,
        length,
        name,
        message,
        stack,
        value,
        writable,
        enumerable,
        configurable,
        get,
        set,
        done,
        next,
        then,
        arguments,
        caller,
        toString,
        valueOf,
        hasOwnProperty,
        proto: "__proto__",
        undefined,
        null,
        true_: "true",
        false_: "false",
        NaN,
        Infinity,
        globalThis,
        Object,
        Function,
        Array,
        String,
        Number,
        Boolean,
        Symbol,
        Error,
        TypeError,
        RangeError,
        SyntaxError,
        ReferenceError,
        EvalError,
        URIError,
        AggregateError,
        Math,
        JSON,
        Promise,
        RegExp,
        Date,
        Map,
        Set,
        WeakMap,
        WeakSet,
        Proxy,
        Reflect,
        BigInt,
        symbol_iterator: "Symbol.iterator",
        symbol_async_iterator: "Symbol.asyncIterator",
        symbol_has_instance: "Symbol.hasInstance",
        symbol_is_concat_spreadable: "Symbol.isConcatSpreadable",
        symbol_match: "Symbol.match",
        symbol_replace: "Symbol.replace",
        symbol_search: "Symbol.search",
        symbol_species: "Symbol.species",
        symbol_split: "Symbol.split",
        symbol_to_primitive: "Symbol.toPrimitive",
        symbol_to_string_tag: "Symbol.toStringTag",
        symbol_unscopables: "Symbol.unscopables"
    ]
}
