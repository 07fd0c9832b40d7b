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

use std::io;

use thiserror::Error;

use super::dns::LookupError;
use crate::spf::syntax;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid macro escape: {}", describe_escape(.0))]
    InvalidEscape(Option<char>),
    #[error("Unterminated macro expression")]
    UnterminatedMacro,
    #[error("Malformed macro expression: {0}")]
    MalformedMacroBody(syntax::Error),
    #[error("Macro %{{{0}}} is only allowed in explanations")]
    ExpOnlyMacro(char),
    #[error("No value bound for macro %{{{0}}}")]
    UnboundMacro(char),
    #[error("Invalid character {0:?} in explanation")]
    InvalidExplanationChar(char),
    #[error("DNS resolution failed: {0}")]
    ResolutionFailure(#[from] LookupError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Whether retrying the same operation could give a different result.
    ///
    /// An SPF evaluator maps permanent errors to `permerror` and the rest to
    /// `temperror`.
    pub fn is_permanent(&self) -> bool {
        match *self {
            Self::ResolutionFailure(ref e) => !e.is_temporary(),
            Self::Io(_) => false,
            _ => true,
        }
    }
}

impl From<syntax::Error> for Error {
    fn from(e: syntax::Error) -> Self {
        match e {
            syntax::Error::IsolatedPercent(c) => Self::InvalidEscape(c),
            syntax::Error::UnterminatedMacroExpand => Self::UnterminatedMacro,
            e => Self::MalformedMacroBody(e),
        }
    }
}

fn describe_escape(c: &Option<char>) -> String {
    match *c {
        None => "% at end of input".to_owned(),
        Some(c) => format!("%{}", c),
    }
}
