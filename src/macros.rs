/// Generates a non-exhaustive enum whose variants map to AMI wire names.
///
/// Produces: enum definition + `ALL` + `as_str()` + `Display` + `AsRef<str>`
/// + `Into<String>`
/// + `FromStr` (ASCII case-insensitive). The error type is a tuple struct
/// holding the rejected input and must be defined next to the invocation.
///
/// ```ignore
/// define_wire_enum! {
///     error_type: ParseThingError,
///     /// Doc comment for the enum.
///     pub enum Thing {
///         Foo => "Foo",
///         BarBaz => "BarBaz",
///     }
/// }
/// ```
macro_rules! define_wire_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$Name] = &[ $( $Name::$variant, )+ ];

            /// Wire-format name string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl From<$Name> for String {
            fn from(v: $Name) -> String {
                v.as_str().to_string()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($wire) {
                        return Ok($Name::$variant);
                    }
                )+
                Err($Err(s.to_string()))
            }
        }
    };
}
