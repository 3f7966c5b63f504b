// Routes function-scoped tracing through the `log` facade.
//
// Use it like this:
//
//   tracer!("Session::op_encrypt");
//   t!("{} recipients", recipients.len());
macro_rules! tracer {
    ( $func:expr ) => {
        // Currently, Rust doesn't support $( ... ) in a nested
        // macro's definition.  See:
        // https://users.rust-lang.org/t/nested-macros-issue/8348/2
        #[allow(unused_macros)]
        macro_rules! t {
            ( $fmt:expr ) =>
            { log::trace!("{}: {}", $func, $fmt) };
            ( $fmt:expr, $a:expr ) =>
            { log::trace!("{}: {}", $func, format!($fmt, $a)) };
            ( $fmt:expr, $a:expr, $b:expr ) =>
            { log::trace!("{}: {}", $func, format!($fmt, $a, $b)) };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr ) =>
            { log::trace!("{}: {}", $func, format!($fmt, $a, $b, $c)) };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, $d:expr ) =>
            { log::trace!("{}: {}", $func, format!($fmt, $a, $b, $c, $d)) };
        }
    }
}

/// Defines an opaque integer newtype with named values.
///
/// The binding layer passes these values through without looking at
/// their bits.  Only the engine interprets them.
macro_rules! opaque_int {
    (
        $(#[$attr:meta])*
        pub struct $name:ident($ty:ty) {
            $(
                $(#[$cattr:meta])*
                const $cname:ident = $val:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default,
                 PartialOrd, Ord,
                 serde::Serialize, serde::Deserialize)]
        pub struct $name(pub $ty);

        impl $name {
            $(
                $(#[$cattr])*
                pub const $cname: $name = $name($val);
            )*

            /// Returns the raw value.
            pub const fn bits(self) -> $ty {
                self.0
            }

            /// Returns whether all bits of `other` are set in `self`.
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl From<$ty> for $name {
            fn from(v: $ty) -> Self {
                $name(v)
            }
        }

        impl From<$name> for $ty {
            fn from(v: $name) -> Self {
                v.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}
