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

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// Configuration for SPF macro expansion.
///
/// This is typically embedded in a larger TOML file, but can also be loaded
/// on its own with `SpfConfig::load`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SpfConfig {
    /// The host name to report as the receiving host, via `%{r}`.
    ///
    /// If empty, `%{r}` expands to `unknown`.
    #[serde(default)]
    pub receiving_host: String,

    /// Limits on the DNS queries made while expanding macros.
    ///
    /// The defaults are reasonable for most installations.
    #[serde(default)]
    pub dns: DnsConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// The maximum time, in seconds, to wait for any single DNS query made
    /// while expanding a macro. 0 disables the limit.
    ///
    /// RFC 7208 § 4.6.4 suggests at least 20 seconds for the whole SPF check.
    pub lookup_timeout_secs: u64,

    /// The maximum number of PTR names to consider when finding the
    /// validated domain name for `%{p}`.
    pub max_ptr_names: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_secs: 20,
            max_ptr_names: 10,
        }
    }
}

impl DnsConfig {
    pub fn lookup_timeout(&self) -> Option<Duration> {
        if 0 == self.lookup_timeout_secs {
            None
        } else {
            Some(Duration::from_secs(self.lookup_timeout_secs))
        }
    }
}

impl SpfConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }
}
