//! Parses beanstalkd command lines.
use std::fmt;

use crate::types::protocol::{BeanstalkCommand, BeanstalkResponse};
use crate::types::serialisable::BeanstalkSerialisable;

/// Longest accepted command line, excluding its CRLF.
pub const MAX_LINE_LEN: usize = 222;

/// Longest accepted tube name.
pub const MAX_TUBE_NAME_LEN: usize = 200;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsingError {
    BadFormat,
    UnknownCommand,
    /// A well-formed `put` line followed by extra bytes. Unlike other
    /// malformed lines this still counts as a `put` attempt.
    TrailingPutArgs,
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadFormat => "bad format",
            Self::UnknownCommand => "unknown command",
            Self::TrailingPutArgs => "trailing arguments to put",
        })
    }
}

impl std::error::Error for ParsingError {}

impl From<ParsingError> for BeanstalkResponse {
    fn from(value: ParsingError) -> Self {
        match value {
            ParsingError::BadFormat | ParsingError::TrailingPutArgs => {
                BeanstalkResponse::BadFormat
            },
            ParsingError::UnknownCommand => BeanstalkResponse::UnknownCommand,
        }
    }
}

impl BeanstalkSerialisable for ParsingError {
    fn serialise_beanstalk(&self) -> Vec<u8> {
        BeanstalkResponse::from(*self).serialise_beanstalk()
    }
}

#[derive(Clone, Copy, Debug)]
enum Verb {
    Put,
    Peek,
    PeekReady,
    PeekDelayed,
    PeekBuried,
    ReserveWithTimeout,
    Reserve,
    Delete,
    Release,
    Bury,
    Kick,
    KickJob,
    Touch,
    StatsJob,
    StatsTube,
    Stats,
    Use,
    Watch,
    Ignore,
    ListTubesWatched,
    ListTubeUsed,
    ListTubes,
    Quit,
    PauseTube,
}

/// Verbs are matched by prefix, first match wins, so order matters:
/// `reserve-with-timeout ` must precede `reserve` and `stats-job ` must
/// precede `stats`.
const VERBS: &[(&[u8], Verb)] = &[
    (b"put ", Verb::Put),
    (b"peek ", Verb::Peek),
    (b"peek-ready", Verb::PeekReady),
    (b"peek-delayed", Verb::PeekDelayed),
    (b"peek-buried", Verb::PeekBuried),
    (b"reserve-with-timeout ", Verb::ReserveWithTimeout),
    (b"reserve", Verb::Reserve),
    (b"delete ", Verb::Delete),
    (b"release ", Verb::Release),
    (b"bury ", Verb::Bury),
    (b"kick ", Verb::Kick),
    (b"kick-job ", Verb::KickJob),
    (b"touch ", Verb::Touch),
    (b"stats-job ", Verb::StatsJob),
    (b"stats-tube ", Verb::StatsTube),
    (b"stats", Verb::Stats),
    (b"use ", Verb::Use),
    (b"watch ", Verb::Watch),
    (b"ignore ", Verb::Ignore),
    (b"list-tubes-watched", Verb::ListTubesWatched),
    (b"list-tube-used", Verb::ListTubeUsed),
    (b"list-tubes", Verb::ListTubes),
    (b"quit", Verb::Quit),
    (b"pause-tube", Verb::PauseTube),
];

/// Checks a tube name is non-empty, at most 200 bytes, and drawn from the
/// permitted character set.
pub fn is_valid_tube_name(name: &[u8]) -> bool {
    fn char_is_name_safe(c: u8, is_first: bool) -> bool {
        match c {
            b'a'..=b'z' => true,
            b'A'..=b'Z' => true,
            b'0'..=b'9' => true,
            b'+' | b'/' | b';' | b'.' | b'$' | b'_' | b'(' | b')' => true,
            b'-' => !is_first, // - is only name safe outside first position
            _ => false,
        }
    }

    !name.is_empty()
        && name.len() <= MAX_TUBE_NAME_LEN
        && name
            .iter()
            .enumerate()
            .all(|(i, c)| char_is_name_safe(*c, i == 0))
}

/// A cursor over the arguments of one command line. Tokens borrow from the
/// line.
struct ParseState<'a> {
    from: &'a [u8],
}

impl<'a> ParseState<'a> {
    /// Returns `result` if the line has been fully consumed.
    fn expect_done_and<R>(&self, result: R) -> Result<R, ParsingError> {
        if self.from.is_empty() {
            Ok(result)
        } else {
            Err(ParsingError::BadFormat)
        }
    }

    /// Like `next_token`, but a missing or empty token is malformed.
    fn expect_next_token(&mut self) -> Result<&[u8], ParsingError> {
        let token = self.next_token().ok_or(ParsingError::BadFormat)?;

        if token.is_empty() {
            Err(ParsingError::BadFormat)
        } else {
            Ok(token)
        }
    }

    /// Consumes a token made only of decimal digits.
    fn expect_u64(&mut self) -> Result<u64, ParsingError> {
        let token = self.expect_next_token()?;

        if !token.iter().all(u8::is_ascii_digit) {
            return Err(ParsingError::BadFormat);
        }

        digits_to_u64(token).ok_or(ParsingError::BadFormat)
    }

    fn expect_u32(&mut self) -> Result<u32, ParsingError> {
        self.expect_u64()?
            .try_into()
            .map_err(|_| ParsingError::BadFormat)
    }

    /// Consumes a priority. Priorities wider than 32 bits wrap around.
    fn expect_pri(&mut self) -> Result<u32, ParsingError> {
        Ok(self.expect_u64()? as u32)
    }

    /// Consumes a job ID which may carry a leading `-`. Negative IDs name no
    /// job and come back as 0.
    fn expect_signed_id(&mut self) -> Result<u64, ParsingError> {
        if let Some(rest) = self.from.strip_prefix(b"-") {
            self.from = rest;
            self.expect_u64().map(|_| 0)
        } else {
            self.expect_u64()
        }
    }

    /// Consumes a tube name.
    fn expect_name(&mut self) -> Result<String, ParsingError> {
        let token = self.expect_next_token()?;

        if !is_valid_tube_name(token) {
            return Err(ParsingError::BadFormat);
        }

        // The name character set is ASCII.
        String::from_utf8(token.to_vec()).map_err(|_| ParsingError::BadFormat)
    }

    fn expect_space(&mut self) -> Result<(), ParsingError> {
        match self.from.first() {
            Some(b' ') => {
                self.from = &self.from[1..];
                Ok(())
            },
            _ => Err(ParsingError::BadFormat),
        }
    }

    /// Takes bytes up to the next space, leaving the space itself. Two spaces
    /// in a row yield an empty token; None means the line is used up.
    fn next_token(&mut self) -> Option<&[u8]> {
        if self.from.is_empty() {
            return None;
        }

        let idx = self
            .from
            .iter()
            .position(|c| *c == b' ')
            .unwrap_or(self.from.len());

        let token = &self.from[..idx];
        self.from = &self.from[idx..];

        Some(token)
    }

    /// Reads a leading integer the way C's `strtol` family does: leading
    /// whitespace and one sign are accepted, and everything after the digits
    /// is discarded. Returns the sign, and `None` for the value when there
    /// are no digits.
    fn take_leading_integer(&mut self) -> (bool, Option<&'a [u8]>) {
        let from = std::mem::take(&mut self.from);
        let start = from
            .iter()
            .position(|c| !c.is_ascii_whitespace())
            .unwrap_or(from.len());
        let s = &from[start..];
        let (negative, s) = match s.first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let n_digits = s.iter().take_while(|c| c.is_ascii_digit()).count();

        if n_digits == 0 {
            (negative, None)
        } else {
            (negative, Some(&s[..n_digits]))
        }
    }

    /// Consumes the rest of the line as a lenient job ID. Anything that isn't
    /// a positive number becomes 0, which names no job.
    fn lenient_id(&mut self) -> Result<u64, ParsingError> {
        match self.take_leading_integer() {
            (false, Some(digits)) => {
                digits_to_u64(digits).ok_or(ParsingError::BadFormat)
            },
            _ => Ok(0),
        }
    }

    /// Consumes the rest of the line as a reservation timeout in seconds.
    /// `None` means a negative timeout, which waits forever.
    fn lenient_timeout(&mut self) -> Option<u32> {
        match self.take_leading_integer() {
            (_, None) => Some(0),
            (negative, Some(digits)) => {
                let value = digits_to_u64(digits).unwrap_or(u64::MAX);
                if negative && value > 0 {
                    None
                } else {
                    Some(value.min(u32::MAX as u64) as u32)
                }
            },
        }
    }

    /// Consumes the rest of the line as a kick bound. Digits are required.
    fn kick_bound(&mut self) -> Result<u64, ParsingError> {
        match self.take_leading_integer() {
            (_, None) => Err(ParsingError::BadFormat),
            (true, Some(_)) => Ok(0),
            (false, Some(digits)) => {
                digits_to_u64(digits).ok_or(ParsingError::BadFormat)
            },
        }
    }
}

impl<'a> From<&'a [u8]> for ParseState<'a> {
    fn from(from: &'a [u8]) -> Self {
        ParseState { from }
    }
}

/// Folds ASCII digits into a u64, returning None on overflow.
fn digits_to_u64(digits: &[u8]) -> Option<u64> {
    digits.iter().try_fold(0u64, |acc, c| {
        acc.checked_mul(10)?.checked_add((c - b'0') as u64)
    })
}

fn split_verb(line: &[u8]) -> Option<(Verb, &[u8])> {
    VERBS.iter().find_map(|(prefix, verb)| {
        line.strip_prefix(*prefix).map(|rest| (*verb, rest))
    })
}

impl TryFrom<&[u8]> for BeanstalkCommand {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        use BeanstalkCommand::*;

        if value.len() > MAX_LINE_LEN {
            return Err(ParsingError::BadFormat);
        }

        let (verb, rest) =
            split_verb(value).ok_or(ParsingError::UnknownCommand)?;
        let mut ps: ParseState = rest.into();

        let cmd = match verb {
            // <cmd>
            Verb::ListTubeUsed => ListTubeUsed,
            Verb::ListTubesWatched => ListTubesWatched,
            Verb::ListTubes => ListTubes,
            Verb::PeekBuried => PeekBuried,
            Verb::PeekDelayed => PeekDelayed,
            Verb::PeekReady => PeekReady,
            Verb::Quit => Quit,
            Verb::Reserve => Reserve,
            Verb::Stats => StatsServer,

            // <cmd> <id>, ignoring anything after the id
            Verb::Delete => {
                return Ok(Delete {
                    id: ps.lenient_id()?,
                })
            },
            Verb::KickJob => {
                return Ok(KickJob {
                    id: ps.lenient_id()?,
                })
            },
            Verb::Peek => {
                return Ok(Peek {
                    id: ps.lenient_id()?,
                })
            },
            Verb::StatsJob => {
                return Ok(StatsJob {
                    id: ps.lenient_id()?,
                })
            },
            Verb::Touch => {
                return Ok(Touch {
                    id: ps.lenient_id()?,
                })
            },

            // <cmd> <bound>
            Verb::Kick => {
                return Ok(Kick {
                    bound: ps.kick_bound()?,
                })
            },

            // <cmd> <timeout>
            Verb::ReserveWithTimeout => {
                return Ok(ReserveWithTimeout {
                    timeout: ps.lenient_timeout(),
                })
            },

            // <cmd> <tube>
            Verb::Use => Use {
                tube: ps.expect_name()?,
            },
            Verb::Watch => Watch {
                tube: ps.expect_name()?,
            },
            Verb::Ignore => Ignore {
                tube: ps.expect_name()?,
            },
            Verb::StatsTube => StatsTube {
                tube: ps.expect_name()?,
            },

            // <cmd> <id> <pri>
            Verb::Bury => Bury {
                id: ps.expect_signed_id()?,
                pri: {
                    ps.expect_space()?;
                    ps.expect_pri()?
                },
            },

            // <cmd> <tube> <delay>
            Verb::PauseTube => {
                ps.expect_space()?;
                PauseTube {
                    tube: ps.expect_name()?,
                    delay: {
                        ps.expect_space()?;
                        ps.expect_u32()?
                    },
                }
            },

            // <cmd> <id> <pri> <delay>
            Verb::Release => Release {
                id: ps.expect_signed_id()?,
                pri: {
                    ps.expect_space()?;
                    ps.expect_pri()?
                },
                delay: {
                    ps.expect_space()?;
                    ps.expect_u32()?
                },
            },

            // <cmd> <pri> <delay> <ttr> <n_bytes>
            Verb::Put => {
                let pri = ps.expect_pri()?;
                ps.expect_space()?;
                let delay = ps.expect_u32()?;
                ps.expect_space()?;
                let ttr = ps.expect_u32()?;
                ps.expect_space()?;
                let n_bytes = ps.expect_u32()?;

                return ps
                    .expect_done_and(Put {
                        pri,
                        delay,
                        ttr,
                        n_bytes,
                    })
                    .map_err(|_| ParsingError::TrailingPutArgs);
            },
        };

        ps.expect_done_and(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        use BeanstalkCommand::*;
        use ParsingError::*;

        const U32_MAX_PLUS_1: u64 = 1 << 32;
        const U64_MAX_PLUS_1: u128 = 1 << 64;

        // Parses to exactly `res`.
        #[track_caller]
        fn ok(line: &[u8], res: BeanstalkCommand) {
            assert_eq!(line.try_into(), Ok(res));
        }

        // Rejected as malformed.
        #[track_caller]
        fn bf(line: &[u8]) {
            assert_eq!(
                TryInto::<BeanstalkCommand>::try_into(line),
                Err(BadFormat)
            );
        }

        // Not a recognised verb.
        #[track_caller]
        fn uc(line: &[u8]) {
            assert_eq!(
                TryInto::<BeanstalkCommand>::try_into(line),
                Err(UnknownCommand)
            );
        }

        let name_200_bytes: String = "a".repeat(200);
        let name_201_bytes: String = "a".repeat(201);

        // Junk
        uc(b"");
        uc(b" ");
        uc(b"syntax-error");
        uc(b"123");
        uc(b"st ats");
        uc(b" stats");

        // put: strict arguments, wrapping priority
        ok(
            b"put 987 654 321 123",
            Put {
                pri: 987,
                delay: 654,
                ttr: 321,
                n_bytes: 123,
            },
        );
        ok(
            format!("put {} 0 0 0", U32_MAX_PLUS_1 + 5).as_bytes(),
            Put {
                pri: 5,
                delay: 0,
                ttr: 0,
                n_bytes: 0,
            },
        );
        bf(format!("put {U64_MAX_PLUS_1} 0 0 0").as_bytes());
        bf(format!("put 0 {U32_MAX_PLUS_1} 0 0").as_bytes());
        bf(format!("put 0 0 {U32_MAX_PLUS_1} 0").as_bytes());
        bf(format!("put 0 0 0 {U32_MAX_PLUS_1}").as_bytes());
        bf(b"put -1 0 0 0");
        bf(b"put 0 0 0");
        bf(b"put 0  0 0 0");
        uc(b"put");
        assert_eq!(
            TryInto::<BeanstalkCommand>::try_into(&b"put 0 0 0 1 "[..]),
            Err(TrailingPutArgs)
        );
        assert_eq!(
            TryInto::<BeanstalkCommand>::try_into(&b"put 0 0 0 1 x"[..]),
            Err(TrailingPutArgs)
        );

        // Tube names
        ok(
            b"use tube_name_here-098+/;.()-",
            Use {
                tube: "tube_name_here-098+/;.()-".into(),
            },
        );
        bf(b"use foo bar");
        bf(b"use -foo");
        bf(b"use -");
        bf(b"use foo#bar");
        bf(b"use ");
        uc(b"use");
        ok(
            format!("use {name_200_bytes}").as_bytes(),
            Use {
                tube: name_200_bytes.clone(),
            },
        );
        bf(format!("use {name_201_bytes}").as_bytes());

        ok(b"reserve", Reserve);
        bf(b"reserve ");
        bf(b"reserve 1");

        ok(
            b"reserve-with-timeout 123",
            ReserveWithTimeout { timeout: Some(123) },
        );
        ok(
            b"reserve-with-timeout -1",
            ReserveWithTimeout { timeout: None },
        );
        ok(
            b"reserve-with-timeout foo",
            ReserveWithTimeout { timeout: Some(0) },
        );
        ok(b"reserve-with-timeout ", ReserveWithTimeout { timeout: Some(0) });
        bf(b"reserve-with-timeout");

        ok(b"delete 321", Delete { id: 321 });
        ok(b"delete 321 extra", Delete { id: 321 });
        ok(b"delete ", Delete { id: 0 });
        ok(b"delete -5", Delete { id: 0 });
        ok(b"delete foo", Delete { id: 0 });
        uc(b"delete");
        bf(format!("delete {U64_MAX_PLUS_1}").as_bytes());

        ok(
            b"release 987 654 321",
            Release {
                id: 987,
                pri: 654,
                delay: 321,
            },
        );
        ok(
            b"release -3 1 1",
            Release {
                id: 0,
                pri: 1,
                delay: 1,
            },
        );
        bf(b"release 1 -1 0");
        bf(b"release 1 1 -1");
        bf(b"release 1 1 1 ");
        bf(b"release foo 1 1");

        ok(b"bury 543 987", Bury { id: 543, pri: 987 });
        ok(b"bury -1 0", Bury { id: 0, pri: 0 });
        bf(b"bury 1 -1");
        bf(b"bury 1 1 ");
        bf(b"bury 1 1 1");
        bf(b"bury x 1");

        ok(b"touch 123", Touch { id: 123 });
        uc(b"touch");
        ok(
            b"watch hello_world",
            Watch {
                tube: "hello_world".into(),
            },
        );
        ok(
            b"ignore hello_world",
            Ignore {
                tube: "hello_world".into(),
            },
        );
        uc(b"ignore");

        ok(b"peek 987", Peek { id: 987 });
        uc(b"peek");
        ok(b"peek-ready", PeekReady);
        ok(b"peek-delayed", PeekDelayed);
        ok(b"peek-buried", PeekBuried);
        bf(b"peek-ready ");
        bf(b"peek-buried 1");

        ok(b"kick 999", Kick { bound: 999 });
        ok(b"kick 5 more", Kick { bound: 5 });
        ok(b"kick -5", Kick { bound: 0 });
        bf(b"kick ");
        bf(b"kick foo");
        uc(b"kick");
        ok(b"kick-job 432", KickJob { id: 432 });
        ok(b"kick-job -1", KickJob { id: 0 });
        uc(b"kick-job");

        ok(b"stats-job 432", StatsJob { id: 432 });
        bf(b"stats-job");
        ok(
            b"stats-tube hello_world",
            StatsTube {
                tube: "hello_world".into(),
            },
        );
        bf(b"stats-tube");
        ok(b"stats", StatsServer);
        bf(b"stats ");

        ok(b"list-tubes", ListTubes);
        ok(b"list-tube-used", ListTubeUsed);
        ok(b"list-tubes-watched", ListTubesWatched);
        bf(b"list-tubes ");

        ok(b"quit", Quit);
        bf(b"quit now");

        ok(
            b"pause-tube hello_world 62",
            PauseTube {
                tube: "hello_world".into(),
                delay: 62,
            },
        );
        bf(b"pause-tube hello_world");
        bf(b"pause-tube hello_world -1");
        bf(b"pause-tube");
    }

    #[test]
    fn test_line_length_limit() {
        let name = "a".repeat(200);
        let longest = format!("pause-tube {name} 4294967295");
        assert_eq!(longest.len(), MAX_LINE_LEN);
        assert!(BeanstalkCommand::try_from(longest.as_bytes()).is_ok());

        let too_long = format!("{longest}0");
        assert_eq!(
            BeanstalkCommand::try_from(too_long.as_bytes()),
            Err(ParsingError::BadFormat)
        );
    }

    #[test]
    fn test_error_replies() {
        fn reply(line: &[u8]) -> Vec<u8> {
            BeanstalkCommand::try_from(line)
                .map(|_| Vec::new())
                .unwrap_or_else(|e| e.serialise_beanstalk())
        }

        assert_eq!(reply(b"frobnicate"), b"UNKNOWN_COMMAND\r\n");
        assert_eq!(reply(b"delete x"), b"BAD_FORMAT\r\n");
        assert_eq!(reply(b"put 0 0 10 1 extra"), b"BAD_FORMAT\r\n");
        assert_eq!(
            BeanstalkResponse::from(ParsingError::UnknownCommand),
            BeanstalkResponse::UnknownCommand
        );
    }
}
