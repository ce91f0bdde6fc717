use std::fmt;

use crate::types::protocol::BeanstalkResponse;
use crate::types::serialisable::BeanstalkSerialisable;

/// Ways an engine operation can fail. Each maps onto exactly one protocol
/// reply.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BeanstalkError {
    BadFormat,
    NotFound,
    TimedOut,
    DeadlineSoon,
    NotIgnored,
    JobTooBig,
    ExpectedCrlf,
    Internal,
}

impl fmt::Display for BeanstalkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadFormat => "bad format",
            Self::NotFound => "not found",
            Self::TimedOut => "timed out",
            Self::DeadlineSoon => "deadline soon",
            Self::NotIgnored => "cannot ignore the only watched tube",
            Self::JobTooBig => "job too big",
            Self::ExpectedCrlf => "expected CRLF after job body",
            Self::Internal => "internal error",
        })
    }
}

impl std::error::Error for BeanstalkError {}

impl From<BeanstalkError> for BeanstalkResponse {
    fn from(value: BeanstalkError) -> Self {
        match value {
            BeanstalkError::BadFormat => BeanstalkResponse::BadFormat,
            BeanstalkError::NotFound => BeanstalkResponse::NotFound,
            BeanstalkError::TimedOut => BeanstalkResponse::TimedOut,
            BeanstalkError::DeadlineSoon => BeanstalkResponse::DeadlineSoon,
            BeanstalkError::NotIgnored => BeanstalkResponse::NotIgnored,
            BeanstalkError::JobTooBig => BeanstalkResponse::JobTooBig,
            BeanstalkError::ExpectedCrlf => BeanstalkResponse::ExpectedCRLF,
            BeanstalkError::Internal => BeanstalkResponse::InternalError,
        }
    }
}

impl BeanstalkSerialisable for BeanstalkError {
    fn serialise_beanstalk(&self) -> Vec<u8> {
        BeanstalkResponse::from(*self).serialise_beanstalk()
    }
}
