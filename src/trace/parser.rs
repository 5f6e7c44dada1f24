use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{alpha1, char, digit1, hex_digit1, line_ending, multispace1, not_line_ending, space0, space1},
    combinator::{eof, map, map_res, opt, value},
    multi::many0,
    sequence::{pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::plat::{RegisterFile, Target};

use super::{Record, Script, Span, TraceError, TraceLine};

/// Default cost of an `exec` record without an explicit cycle count.
pub const DEFAULT_INSTRUCTION_CYCLES: u64 = 2;

pub fn parse_hex(inp: Span) -> IResult<Span, u32> {
    map_res(
        preceded(opt(alt((tag("$"), tag_no_case("0x")))), hex_digit1),
        |x: Span| u32::from_str_radix(x.fragment(), 16),
    )(inp)
}

fn parse_hex_u16(inp: Span) -> IResult<Span, u16> {
    map_res(parse_hex, u16::try_from)(inp)
}

fn parse_hex_u8(inp: Span) -> IResult<Span, u8> {
    map_res(parse_hex, u8::try_from)(inp)
}

fn parse_dec<T: std::str::FromStr>(inp: Span) -> IResult<Span, T> {
    map_res(digit1, |x: Span| x.fragment().parse::<T>())(inp)
}

fn parse_target(inp: Span) -> IResult<Span, Target> {
    map_res(alpha1, |x: Span| x.fragment().parse::<Target>())(inp)
}

fn parse_register_file(inp: Span) -> IResult<Span, RegisterFile> {
    map_res(alpha1, |x: Span| x.fragment().parse::<RegisterFile>())(inp)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(Span<'a>) -> IResult<Span<'a>, Span<'a>> {
    terminated(tag_no_case(word), space1)
}

fn parse_comment(inp: Span) -> IResult<Span, Span> {
    preceded(char('#'), not_line_ending)(inp)
}

fn skip_blank(inp: Span) -> IResult<Span, ()> {
    value((), many0(alt((multispace1, parse_comment))))(inp)
}

impl Record {
    pub fn parse(inp: Span) -> IResult<Span, Self> {
        alt((
            map(
                preceded(keyword("sym"), separated_pair(parse_dec, space1, parse_hex)),
                |(sloc, absolute)| Self::Symbol { sloc, absolute },
            ),
            map(
                preceded(
                    keyword("bank"),
                    separated_pair(
                        parse_dec,
                        space1,
                        alt((map(parse_dec::<u32>, Some), value(None, tag("-")))),
                    ),
                ),
                |(window, bank)| Self::Bank { window, bank },
            ),
            map(preceded(keyword("mapper"), parse_dec::<u16>), Self::Mapper),
            map(
                preceded(
                    keyword("reg"),
                    tuple((
                        parse_register_file,
                        preceded(space1, parse_dec),
                        preceded(space1, parse_hex_u16),
                    )),
                ),
                |(file, index, value)| Self::Register { file, index, value },
            ),
            map(
                preceded(
                    keyword("exec"),
                    pair(parse_hex_u16, opt(preceded(space1, parse_dec::<u64>))),
                ),
                |(logical, cycles)| Self::Exec {
                    logical,
                    cycles: cycles.unwrap_or(DEFAULT_INSTRUCTION_CYCLES),
                },
            ),
            map(
                tuple((
                    alt((value(false, keyword("read")), value(true, keyword("write")))),
                    parse_target,
                    preceded(space1, parse_hex_u16),
                    preceded(space1, parse_hex_u8),
                )),
                |(is_write, target, address, value)| Self::Access {
                    target,
                    address,
                    value,
                    is_write,
                },
            ),
        ))(inp)
    }
}

fn parse_line(inp: Span) -> IResult<Span, Record> {
    terminated(
        Record::parse,
        tuple((space0, opt(parse_comment), alt((line_ending, eof)))),
    )(inp)
}

/// Parses a whole trace script.
///
/// # Errors
///
/// Returns [TraceError::Syntax] pointing at the first line that is not a valid record.
pub fn parse_script(src: &str, name: &str) -> Result<Script, TraceError> {
    let mut inp = Span::new_extra(src, name);
    let mut lines = Vec::new();
    loop {
        // skip_blank cannot fail; many0 stops at the first non-blank
        if let Ok((rest, ())) = skip_blank(inp) {
            inp = rest;
        }
        if inp.fragment().is_empty() {
            break;
        }
        match parse_line(inp) {
            Ok((rest, record)) => {
                lines.push(TraceLine {
                    line: inp.location_line(),
                    record,
                });
                inp = rest;
            }
            Err(_) => {
                return Err(TraceError::Syntax {
                    name: name.to_owned(),
                    loc: (inp.location_line() as usize, inp.get_utf8_column()),
                    span: inp.fragment().lines().next().unwrap_or_default().to_owned(),
                });
            }
        }
    }
    log::debug!("parsed {} records from {}", lines.len(), name);
    Ok(Script {
        name: name.to_owned(),
        lines,
    })
}
