//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

//! The macro sub-grammar of SPF records.
//! RFC 7208 § 7.1
//!
//! ```text
//!   macro-string     = *( macro-expand / macro-literal )
//!   macro-expand     = ( "%{" macro-letter transformers *delimiter "}" )
//!                      / "%%" / "%_" / "%-"
//!   macro-literal    = %x21-24 / %x26-7E
//!   macro-letter     = "s" / "l" / "o" / "d" / "i" / "p" / "h" /
//!                      "c" / "r" / "t" / "v"
//!   transformers     = *DIGIT [ "r" ]
//!   delimiter        = "." / "-" / "+" / "," / "/" / "_" / "="
//! ```

use std::mem;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

/// The mechanism or modifier a `Token` was parsed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermKind {
    All,
    Include,
    A,
    Mx,
    Ptr,
    Ip4,
    Ip6,
    Exists,
    Redirect,
    Explanation,
}

/// A single term of an SPF record as produced by the record tokeniser.
///
/// Macro expansion only ever looks at `value`; the other fields are carried
/// for the benefit of the mechanism evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub qualifier: Qualifier,
    pub kind: TermKind,
    pub value: MacroString<'a>,
}

impl<'a> Token<'a> {
    pub fn new(qualifier: Qualifier, kind: TermKind, value: &'a str) -> Self {
        Self {
            qualifier,
            kind,
            value: MacroString(value),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroString<'a>(&'a str);

impl<'a> MacroString<'a> {
    pub fn new(s: &'a str) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroElement<'a> {
    Literal(&'a str),
    Expand(MacroExpand<'a>),
}

/// The actually-a-macro case of `macro-expand`.
///
/// The `%%`, `%_`, and `%-` cases of `macro-expand` are converted into
/// `MacroElement::Literal` with the output text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroExpand<'a> {
    pub kind: Macro,
    /// The number of right-hand parts to keep. Never zero.
    pub keep_parts: Option<usize>,
    pub reverse: bool,
    /// The characters to split on. Empty means the default of `.`.
    pub delimiters: &'a str,
    /// Whether the macro letter was upper-case, meaning the final value is
    /// URL-escaped.
    pub url_escape: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd)]
pub enum Macro {
    Sender,
    SenderLocalPart,
    SenderDomain,
    Domain,
    Ip,
    Ptr,
    IpVersion,
    HeloDomain,
    // Below this point: `exp` only
    SmtpClientIp,
    ReceivingHost,
    CurrentTimestamp,
}

impl Macro {
    /// Looks up the macro for the given letter, ignoring case.
    pub fn from_letter(letter: char) -> Option<Self> {
        Some(match letter.to_ascii_lowercase() {
            's' => Self::Sender,
            'l' => Self::SenderLocalPart,
            'o' => Self::SenderDomain,
            'd' => Self::Domain,
            'i' => Self::Ip,
            'p' => Self::Ptr,
            'v' => Self::IpVersion,
            'h' => Self::HeloDomain,
            'c' => Self::SmtpClientIp,
            'r' => Self::ReceivingHost,
            't' => Self::CurrentTimestamp,
            _ => return None,
        })
    }

    /// The canonical (lower-case) letter for this macro.
    pub fn letter(self) -> char {
        match self {
            Self::Sender => 's',
            Self::SenderLocalPart => 'l',
            Self::SenderDomain => 'o',
            Self::Domain => 'd',
            Self::Ip => 'i',
            Self::Ptr => 'p',
            Self::IpVersion => 'v',
            Self::HeloDomain => 'h',
            Self::SmtpClientIp => 'c',
            Self::ReceivingHost => 'r',
            Self::CurrentTimestamp => 't',
        }
    }

    /// Whether this macro may only be used in explanation strings.
    pub fn is_exp_only(self) -> bool {
        self >= Self::SmtpClientIp
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid integer")]
    InvalidInteger,
    #[error("macro keeps zero parts")]
    ZeroKeepParts,
    #[error("unknown macro transformer: {0}")]
    UnknownMacroTransformer(char),
    #[error("unknown macro: {0}")]
    UnknownMacro(char),
    #[error("digit after macro delimiters")]
    MisplacedDigit,
    #[error("{}", describe_isolated_percent(.0))]
    IsolatedPercent(Option<char>),
    #[error("unterminated macro expand")]
    UnterminatedMacroExpand,
    #[error("empty macro")]
    EmptyMacro,
}

fn describe_isolated_percent(c: &Option<char>) -> String {
    match *c {
        None => "isolated percent sign at end of input".to_owned(),
        Some(c) => format!("isolated percent sign before '{}'", c),
    }
}

impl<'a> IntoIterator for MacroString<'a> {
    type Item = Result<MacroElement<'a>, Error>;
    type IntoIter = MacroElements<'a>;

    fn into_iter(self) -> MacroElements<'a> {
        MacroElements(self.0)
    }
}

/// Iterates the elements of a `MacroString`.
///
/// After the first error, the iterator is exhausted.
#[derive(Clone, Debug)]
pub struct MacroElements<'a>(&'a str);

impl<'a> Iterator for MacroElements<'a> {
    type Item = Result<MacroElement<'a>, Error>;

    fn next(&mut self) -> Option<Result<MacroElement<'a>, Error>> {
        if self.0.is_empty() {
            return None;
        }

        let elt = match self.0.find('%') {
            None => MacroElement::Literal(mem::take(&mut self.0)),

            Some(0) => {
                let mut chars = self.0[1..].chars();
                let escape = chars.next();
                let tail = chars.as_str();
                self.0 = tail;

                match escape {
                    Some('%') => MacroElement::Literal("%"),
                    Some('_') => MacroElement::Literal(" "),
                    Some('-') => MacroElement::Literal("%20"),
                    Some('{') => {
                        let Some((body, rest)) = tail.split_once('}') else {
                            self.0 = "";
                            return Some(Err(Error::UnterminatedMacroExpand));
                        };

                        self.0 = rest;
                        let result = parse_macro_expand(body);
                        if result.is_err() {
                            self.0 = "";
                        }
                        return Some(result);
                    },

                    c => {
                        self.0 = "";
                        return Some(Err(Error::IsolatedPercent(c)));
                    },
                }
            },

            Some(n) => {
                let literal = &self.0[..n];
                self.0 = &self.0[n..];
                MacroElement::Literal(literal)
            },
        };

        Some(Ok(elt))
    }
}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, '.' | '-' | '+' | ',' | '/' | '_' | '=')
}

/// Parses the text between `%{` and `}`.
///
/// The parts must occur strictly in the order letter, digits, `r`,
/// delimiters.
fn parse_macro_expand(s: &str) -> Result<MacroElement<'_>, Error> {
    let mut chars = s.chars();
    let (kind, url_escape) = match chars.next() {
        None => return Err(Error::EmptyMacro),
        Some(c) => (
            Macro::from_letter(c).ok_or(Error::UnknownMacro(c))?,
            c.is_ascii_uppercase(),
        ),
    };

    let s = chars.as_str();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, mut s) = s.split_at(digits_end);
    let keep_parts = if digits.is_empty() {
        None
    } else {
        let n = digits.parse::<usize>().map_err(|_| Error::InvalidInteger)?;
        // RFC 7208 § 7.3: "If a DIGIT is specified, the value MUST be
        // nonzero."
        if 0 == n {
            return Err(Error::ZeroKeepParts);
        }
        Some(n)
    };

    let reverse = match s.strip_prefix(|c: char| 'r' == c || 'R' == c) {
        Some(rest) => {
            s = rest;
            true
        },
        None => false,
    };

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            return Err(Error::MisplacedDigit);
        }

        if !is_delimiter(ch) {
            return Err(Error::UnknownMacroTransformer(ch));
        }
    }

    Ok(MacroElement::Expand(MacroExpand {
        kind,
        keep_parts,
        reverse,
        delimiters: s,
        url_escape,
    }))
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn lit(s: &str) -> MacroElement<'_> {
        MacroElement::Literal(s)
    }

    fn mac(
        kind: Macro,
        reverse: bool,
        keep_parts: Option<usize>,
        delimiters: &str,
    ) -> MacroElement<'_> {
        MacroElement::Expand(MacroExpand {
            kind,
            reverse,
            keep_parts,
            delimiters,
            url_escape: false,
        })
    }

    fn parse(s: &str) -> Result<Vec<MacroElement<'_>>, Error> {
        MacroString(s).into_iter().collect()
    }

    #[test]
    fn parse_macro_string() {
        assert_eq!(Ok(vec![]), parse(""));
        assert_eq!(Ok(vec![lit("foo")]), parse("foo"));
        assert_eq!(
            Ok(vec![
                lit("foo"),
                mac(Macro::Sender, false, None, ""),
                lit("bar"),
            ]),
            parse("foo%{s}bar"),
        );
        assert_eq!(
            Ok(vec![
                lit("foo"),
                lit("%"),
                lit("bar"),
                lit(" "),
                lit("baz"),
                lit("%20"),
            ]),
            parse("foo%%bar%_baz%-"),
        );
        assert_eq!(
            Ok(vec![
                lit("foo"),
                mac(Macro::Sender, true, Some(42), ".-+,/_="),
                lit("bar"),
            ]),
            parse("foo%{s42r.-+,/_=}bar"),
        );
        assert_eq!(
            Ok(vec![
                mac(Macro::SenderLocalPart, false, Some(4), "-"),
                mac(Macro::SenderDomain, true, None, ""),
                mac(Macro::Domain, false, None, ""),
                mac(Macro::Ip, false, None, ""),
                mac(Macro::Ptr, false, None, ""),
                mac(Macro::IpVersion, false, None, ""),
                mac(Macro::HeloDomain, false, None, ""),
                mac(Macro::SmtpClientIp, false, None, ""),
                mac(Macro::ReceivingHost, false, None, ""),
                mac(Macro::CurrentTimestamp, false, None, ""),
            ]),
            parse("%{l4-}%{or}%{d}%{i}%{p}%{v}%{h}%{c}%{r}%{t}"),
        );
        // Leading zeroes are fine
        assert_eq!(
            Ok(vec![mac(Macro::Domain, false, Some(2), "")]),
            parse("%{d02}"),
        );
    }

    #[test]
    fn parse_upper_case_macro() {
        assert_eq!(
            Ok(vec![
                lit("foo"),
                MacroElement::Expand(MacroExpand {
                    kind: Macro::Sender,
                    keep_parts: None,
                    reverse: true,
                    delimiters: ".-+,/_=",
                    url_escape: true,
                }),
                lit("bar"),
            ]),
            parse("foo%{SR.-+,/_=}bar"),
        );
    }

    #[test]
    fn parse_macro_string_errors() {
        assert_eq!(Err(Error::IsolatedPercent(None)), parse("foo%"));
        assert_eq!(Err(Error::IsolatedPercent(Some('b'))), parse("foo%bar"));
        assert_eq!(Err(Error::IsolatedPercent(Some('}'))), parse("%}"));
        assert_eq!(Err(Error::IsolatedPercent(Some('é'))), parse("%é"));
        assert_eq!(Err(Error::UnknownMacro('x')), parse("%{x}"));
        assert_eq!(Err(Error::UnknownMacro('2')), parse("%{2a3}"));
        assert_eq!(Err(Error::EmptyMacro), parse("%{}"));
        assert_eq!(Err(Error::UnterminatedMacroExpand), parse("%{"));
        assert_eq!(Err(Error::UnterminatedMacroExpand), parse("%{foobar"));
        assert_eq!(Err(Error::UnterminatedMacroExpand), parse("%{i2"));
        assert_eq!(Err(Error::UnterminatedMacroExpand), parse("%{234"));
        assert_eq!(Err(Error::UnknownMacroTransformer('x')), parse("%{ox}"));
        assert_eq!(
            Err(Error::UnknownMacroTransformer('a')),
            parse("%{s2a3}"),
        );
        assert_eq!(
            Err(Error::UnknownMacroTransformer('i')),
            parse("%{s2ir-3}"),
        );
        assert_eq!(Err(Error::MisplacedDigit), parse("%{i-2}"));
        assert_eq!(Err(Error::MisplacedDigit), parse("%{dr2}"));
        assert_eq!(Err(Error::UnknownMacroTransformer('r')), parse("%{drr}"));
        assert_eq!(Err(Error::ZeroKeepParts), parse("%{d0}"));
        assert_eq!(Err(Error::ZeroKeepParts), parse("%{d00r}"));
        assert_eq!(
            Err(Error::InvalidInteger),
            parse("%{o9999999999999999999999999999}"),
        );
    }

    #[test]
    fn iteration_stops_after_error() {
        let mut it = MacroString::new("a%xb%{d}").into_iter();
        assert_eq!(Some(Ok(lit("a"))), it.next());
        assert_eq!(Some(Err(Error::IsolatedPercent(Some('x')))), it.next());
        assert_eq!(None, it.next());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            "isolated percent sign at end of input",
            Error::IsolatedPercent(None).to_string(),
        );
        assert_eq!(
            "isolated percent sign before 'x'",
            Error::IsolatedPercent(Some('x')).to_string(),
        );
    }

    #[test]
    fn macro_letters() {
        for letter in "slodipvhcrt".chars() {
            let m = Macro::from_letter(letter).unwrap();
            assert_eq!(letter, m.letter());
            assert_eq!(
                Some(m),
                Macro::from_letter(letter.to_ascii_uppercase()),
            );
            assert_eq!(matches!(letter, 'c' | 'r' | 't'), m.is_exp_only());
        }

        assert_eq!(None, Macro::from_letter('x'));
        assert_eq!(None, Macro::from_letter('%'));
    }

    proptest! {
        #[test]
        fn literal_text_is_one_element(s in "[^%]+") {
            prop_assert_eq!(Ok(vec![lit(&s)]), parse(&s));
        }

        #[test]
        fn never_panics(s in "(%|\\{|\\}|[a-zA-Z0-9.=_-]|é){0,24}") {
            let _ = parse(&s);
        }
    }
}
