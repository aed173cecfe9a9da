#[cfg(feature = "cortex_m")]
pub(crate) mod cortex_m;
#[cfg(feature = "std")]
pub(crate) mod dummy;

#[cfg(feature = "cortex_m")]
pub(crate) use self::cortex_m::*;
#[cfg(feature = "std")]
pub(crate) use dummy::*;
