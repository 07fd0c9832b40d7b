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

use std::borrow::Cow;
use std::net::IpAddr;

use chrono::prelude::*;

use super::syntax::Macro;
use crate::support::system_config::SpfConfig;

const POSTMASTER: &str = "postmaster";

/// Immutable context used during the macro expansion of a single SPF check.
///
/// Checks that move to another domain (`include`, `redirect`) derive a new
/// context with `with_domain` instead of modifying this one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Context {
    /// The full sender email address; i.e., from the `MAIL FROM` line.
    ///
    /// Always contains an `@` at byte offset `at`.
    sender: String,
    at: usize,
    /// The domain whose SPF record is being evaluated.
    domain: String,
    /// The sender IP address. Never an IPv4-mapped IPv6 address.
    ip: IpAddr,
    helo_domain: Option<String>,
    receiving_host: Option<String>,
    now: DateTime<Utc>,
}

impl Context {
    /// The full sender address.
    ///
    /// If the sender had no local part, this includes the implicit
    /// `postmaster` local part.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn local_part(&self) -> &str {
        &self.sender[..self.at]
    }

    pub fn sender_domain(&self) -> &str {
        &self.sender[self.at + 1..]
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn helo_domain(&self) -> Option<&str> {
        self.helo_domain.as_deref()
    }

    /// The host performing the check, or `unknown` if not configured.
    pub fn receiving_host(&self) -> &str {
        self.receiving_host.as_deref().unwrap_or("unknown")
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.now
    }

    /// Returns a copy of this context evaluating `domain` instead of the
    /// current domain.
    pub fn with_domain(&self, domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..self.clone()
        }
    }

    /// Returns the raw value of the given macro, before any transformation.
    ///
    /// Returns `None` if the macro has no binding. `%{p}` requires DNS
    /// queries and is never bound here.
    pub fn binding(&self, kind: Macro) -> Option<Cow<'_, str>> {
        // RFC 7208 § 7.2, 7.3
        Some(match kind {
            Macro::Sender => Cow::Borrowed(self.sender()),
            Macro::SenderLocalPart => Cow::Borrowed(self.local_part()),
            Macro::SenderDomain => Cow::Borrowed(self.sender_domain()),
            Macro::Domain => Cow::Borrowed(self.domain()),
            Macro::Ip => Cow::Owned(dotted_ip(self.ip)),
            Macro::Ptr => return None,
            Macro::IpVersion => Cow::Borrowed(match self.ip {
                IpAddr::V4(_) => "in-addr",
                IpAddr::V6(_) => "ip6",
            }),
            Macro::HeloDomain => Cow::Borrowed(self.helo_domain()?),
            Macro::SmtpClientIp => Cow::Owned(self.ip.to_string()),
            Macro::ReceivingHost => Cow::Borrowed(self.receiving_host()),
            Macro::CurrentTimestamp => {
                Cow::Owned(self.now.timestamp().to_string())
            },
        })
    }
}

/// Formats `ip` the way `%{i}` expands it.
///
/// IPv6 addresses use the obsolete dotted-hex format. RFC 7208 § 7.4 shows an
/// example where it is, indeed, 32 hexadecimal nybbles.
fn dotted_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => {
            const HEX: &[u8; 16] = b"0123456789abcdef";

            let mut s = String::with_capacity(63);
            for octet in ip.octets() {
                if !s.is_empty() {
                    s.push('.');
                }
                s.push(char::from(HEX[usize::from(octet >> 4)]));
                s.push('.');
                s.push(char::from(HEX[usize::from(octet & 0xF)]));
            }
            s
        },
    }
}

/// Assembles a `Context` from the identity being checked.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    sender: String,
    domain: String,
    ip: IpAddr,
    helo_domain: Option<String>,
    receiving_host: Option<String>,
    now: Option<DateTime<Utc>>,
}

impl ContextBuilder {
    /// Starts building a context for checking `sender` (the `MAIL FROM`
    /// address) against the SPF record of `domain`, usually the domain part
    /// of `sender`.
    ///
    /// An empty `sender` is treated as `postmaster@{domain}`. A sender with
    /// no `@` is treated as a bare domain with an implicit `postmaster`
    /// local part.
    pub fn new(
        sender: impl Into<String>,
        domain: impl Into<String>,
        ip: IpAddr,
    ) -> Self {
        Self {
            sender: sender.into(),
            domain: domain.into(),
            ip,
            helo_domain: None,
            receiving_host: None,
            now: None,
        }
    }

    /// Starts building a context for checking the `HELO` identity.
    ///
    /// RFC 7208 § 2.3: the sender becomes `postmaster@{helo_domain}`.
    pub fn for_helo(helo_domain: impl Into<String>, ip: IpAddr) -> Self {
        let helo_domain = helo_domain.into();
        Self::new(
            format!("{POSTMASTER}@{helo_domain}"),
            helo_domain.clone(),
            ip,
        )
        .helo_domain(helo_domain)
    }

    pub fn helo_domain(mut self, helo_domain: impl Into<String>) -> Self {
        self.helo_domain = Some(helo_domain.into());
        self
    }

    pub fn receiving_host(mut self, receiving_host: impl Into<String>) -> Self {
        self.receiving_host = Some(receiving_host.into());
        self
    }

    /// Sets the time reported by `%{t}`. Defaults to the time of `build()`.
    pub fn timestamp(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Applies defaults from `config` for anything not set explicitly.
    pub fn config(mut self, config: &SpfConfig) -> Self {
        if self.receiving_host.is_none() && !config.receiving_host.is_empty()
        {
            self.receiving_host = Some(config.receiving_host.clone());
        }
        self
    }

    pub fn build(self) -> Context {
        // RFC 7208 § 4.3: "If the <sender> has no local-part, substitute the
        // string "postmaster" for the local-part."
        let (sender, at) = match self.sender.rfind('@') {
            Some(0) => (format!("{POSTMASTER}{}", self.sender), POSTMASTER.len()),
            Some(at) => (self.sender, at),
            None if self.sender.is_empty() => {
                (format!("{POSTMASTER}@{}", self.domain), POSTMASTER.len())
            },
            None => (format!("{POSTMASTER}@{}", self.sender), POSTMASTER.len()),
        };

        let ip = match self.ip {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map_or(IpAddr::V6(v6), IpAddr::V4),
            ip => ip,
        };

        Context {
            sender,
            at,
            domain: self.domain,
            ip,
            helo_domain: self.helo_domain,
            receiving_host: self.receiving_host,
            now: self.now.unwrap_or_else(Utc::now),
        }
    }
}
