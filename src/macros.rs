/// Defines a transparent bitmask newtype with named flag constants, set operations, and a
/// `Debug` impl that lists the names of the set flags (`LEFT | TOP`).
macro_rules! flag_set {
    (
        $( #[$attrs:meta] )*
        $v:vis struct $name:ident: $native:ty {
            $(
                $( #[$flag_attrs:meta] )*
                $flag:ident = $value:expr
            ),+
            $(,)?
        }
    ) => {
        $( #[$attrs] )*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        $v struct $name($native);

        impl $name {
            /// The empty set.
            $v const NONE: Self = Self(0);

            $(
                $( #[$flag_attrs] )*
                $v const $flag: Self = Self($value);
            )+

            const NAMED: &'static [(&'static str, Self)] = &[ $( (stringify!($flag), Self::$flag), )+ ];

            /// Returns the raw bits.
            #[inline]
            $v const fn bits(self) -> $native {
                self.0
            }

            /// Creates a set from raw bits, discarding bits that don't correspond to a flag.
            #[inline]
            $v const fn from_bits_truncate(bits: $native) -> Self {
                Self(bits & (0 $( | $value )+))
            }

            #[inline]
            $v const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns whether all flags in `other` are also set in `self`.
            #[inline]
            $v const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns whether `self` and `other` have any flag in common.
            #[inline]
            $v const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            #[allow(dead_code)]
            fn from_flag_name(name: &str) -> Option<Self> {
                Self::NAMED.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = Self;

            #[inline]
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                if self.is_empty() {
                    return f.write_str("NONE");
                }
                let mut rest = self.0;
                let mut first = true;
                for (name, flag) in Self::NAMED {
                    if flag.0 != 0 && self.contains(*flag) {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        first = false;
                        f.write_str(name)?;
                        rest &= !flag.0;
                    }
                }
                if rest != 0 {
                    if !first {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{rest:#x}")?;
                }
                Ok(())
            }
        }
    };
}
