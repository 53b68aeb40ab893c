pub mod decode;

#[cfg(test)]
pub(crate) mod testing;
