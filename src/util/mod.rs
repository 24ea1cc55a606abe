pub mod body;
pub mod format;
pub(crate) mod io;
