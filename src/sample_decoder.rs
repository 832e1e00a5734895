//! Parser for the sample lines the peer streams while in record mode.
//!
//! Every captured sample arrives as one ASCII decimal integer terminated by a
//! newline, optionally preceded by a carriage return and padded with spaces.

use nom::{
    character::complete::{i32, line_ending, space0},
    combinator::{eof, opt},
    error::Error,
    sequence::{delimited, terminated},
    Finish, IResult,
};

use std::str::FromStr;

/// One raw amplitude reading from the audio peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample(pub i32);

fn parse_sample(s: &str) -> IResult<&str, RawSample> {
    let (rest, value) = terminated(
        delimited(space0, i32, space0),
        terminated(opt(line_ending), eof),
    )(s)?;
    Ok((rest, RawSample(value)))
}

impl FromStr for RawSample {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_sample(s).finish() {
            Ok((_remaining, sample)) => Ok(sample),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}
