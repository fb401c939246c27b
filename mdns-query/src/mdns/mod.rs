pub mod correlator;
pub mod dispatch;
pub mod message;
pub mod reader;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
