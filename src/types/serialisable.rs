/// Types implementing `BeanstalkSerialisable` can be written back to a client
/// as a complete protocol reply, trailing CRLF included.
pub trait BeanstalkSerialisable {
    /// Converts the value into the bytes sent on the wire.
    fn serialise_beanstalk(&self) -> Vec<u8>;
}
