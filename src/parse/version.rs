use winnow::combinator::{opt, preceded, separated};
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::{one_of, rest, take_while};

// -- Grammar ----------------------------------------------------------------
//
//   version := "v"? part (("." | "-") part)* ("+" build)?
//
// Parts may be empty ("1..2" has three parts). Build metadata is dropped.

fn part<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(0.., |c: char| !matches!(c, '.' | '-' | '+')).parse_next(input)
}

fn version_parts<'i>(input: &mut &'i str) -> ModalResult<Vec<&'i str>> {
    let _: Option<char> = opt('v').parse_next(input)?;
    let parts: Vec<&'i str> = separated(1.., part, one_of(['.', '-'])).parse_next(input)?;
    let _: Option<&str> = opt(preceded('+', rest)).parse_next(input)?;
    Ok(parts)
}

// -- Padding ----------------------------------------------------------------

/// Normalize a version string so plain string comparison orders versions.
///
/// Numeric parts are left-padded to five characters and parts are joined
/// with `-`. A bare `major.minor.patch` gains a trailing `~`, which sorts
/// after any pre-release tag, so `1.0.0` > `1.0.0-beta`.
#[must_use]
pub fn padded_version(input: &str) -> String {
    if input.is_empty() {
        return "0".to_owned();
    }
    let mut parts = match version_parts.parse(input) {
        Ok(parts) => parts,
        Err(_) => vec![input],
    };
    if parts.len() == 3 {
        parts.push("~");
    }
    parts
        .iter()
        .map(|part| {
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                format!("{part:>5}")
            } else {
                (*part).to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
