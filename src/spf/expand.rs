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

//! Expansion of SPF macro strings.
//! RFC 7208 § 7

use std::borrow::Cow;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use itertools::Itertools;
use log::{debug, trace, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::context::Context;
use super::syntax::{Macro, MacroElement, MacroExpand, MacroString, Token};
use crate::support::dns::{LookupError, Resolver};
use crate::support::error::Error;
use crate::support::system_config::SpfConfig;

/// The most PTR names that will be looked at to find the validated domain
/// name. RFC 7208 § 4.6.4
pub const MAX_PTR_NAMES: usize = 10;

/// Expanded domain-specs longer than this have labels removed from the left.
const MAX_DOMAIN_LEN: usize = 253;

/// Characters kept as-is by upper-case macros: RFC 3986 § 2.3 "unreserved".
const URL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    /// The result is used as a DNS name; `exp`-only macros are forbidden.
    DomainSpec,
    /// The result is human-readable text.
    Explanation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DomainRelation {
    Same,
    Subdomain,
    Unrelated,
}

/// Expands macro strings against a `Context`.
///
/// An `Expander` holds no per-check state, so one instance can serve any
/// number of concurrent expansions.
///
/// Lookup timeouts are only enforced when expansion runs inside a tokio
/// runtime. Under any other executor, DNS queries are bounded only by the
/// resolver itself.
#[derive(Clone, Debug)]
pub struct Expander<R> {
    resolver: R,
    lookup_timeout: Option<Duration>,
    max_ptr_names: usize,
}

impl<R: Resolver> Expander<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            lookup_timeout: None,
            max_ptr_names: MAX_PTR_NAMES,
        }
    }

    /// Creates an expander with the lookup timeout and PTR name limit from
    /// `config`.
    pub fn from_config(resolver: R, config: &SpfConfig) -> Self {
        Self {
            resolver,
            lookup_timeout: config.dns.lookup_timeout(),
            max_ptr_names: config.dns.max_ptr_names,
        }
    }

    /// Bounds every DNS query to `timeout`.
    ///
    /// The bound applies only within a tokio runtime with time enabled.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn with_max_ptr_names(mut self, max_ptr_names: usize) -> Self {
        self.max_ptr_names = max_ptr_names;
        self
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Expands `raw`, which may be any macro string: the value of a
    /// mechanism or modifier, or explanation text.
    ///
    /// Every macro letter is permitted. On error, nothing is returned; there
    /// is no partial expansion.
    pub async fn expand(
        &self,
        ctx: &Context,
        raw: &str,
    ) -> Result<String, Error> {
        self.expand_macro_string(ctx, Scope::Explanation, MacroString::new(raw))
            .await
    }

    /// Expands the value of `token`. The qualifier and kind are ignored.
    pub async fn expand_token(
        &self,
        ctx: &Context,
        token: &Token<'_>,
    ) -> Result<String, Error> {
        self.expand_macro_string(ctx, Scope::Explanation, token.value)
            .await
    }

    /// Expands a `domain-spec`, i.e., a macro string that will be used as a
    /// DNS name.
    ///
    /// `%{c}`, `%{r}`, and `%{t}` are rejected, and over-long results are
    /// truncated on the left (RFC 7208 § 7.3).
    pub async fn expand_domain_spec(
        &self,
        ctx: &Context,
        raw: &str,
    ) -> Result<String, Error> {
        self.expand_macro_string(ctx, Scope::DomainSpec, MacroString::new(raw))
            .await
            .map(truncate_domain)
    }

    /// Expands the text of an explanation TXT record.
    ///
    /// Beyond the macro syntax, the text may only contain visible ASCII and
    /// spaces (`explain-string`, RFC 7208 § 6.2).
    pub async fn expand_explanation(
        &self,
        ctx: &Context,
        raw: &str,
    ) -> Result<String, Error> {
        if let Some(bad) =
            raw.chars().find(|&c| ' ' != c && !c.is_ascii_graphic())
        {
            debug!("Invalid character {bad:?} in explanation {raw:?}");
            return Err(Error::InvalidExplanationChar(bad));
        }

        self.expand(ctx, raw).await
    }

    /// Generates the failure explanation named by an `exp=` modifier.
    ///
    /// `exp_domain_spec` is the raw value of the modifier. Per RFC 7208 §
    /// 6.2, any problem at all along the way results in no explanation.
    pub async fn explain(
        &self,
        ctx: &Context,
        exp_domain_spec: &str,
    ) -> Option<String> {
        let domain = match self.expand_domain_spec(ctx, exp_domain_spec).await
        {
            Ok(domain) => domain,
            Err(e) => {
                debug!("Ignoring exp={exp_domain_spec:?}: {e}");
                return None;
            },
        };

        let records =
            match self.with_timeout(self.resolver.txt_lookup(&domain)).await {
                Ok(records) => records,
                Err(e) => {
                    debug!("No explanation from {domain}: {e}");
                    return None;
                },
            };

        let [record] = &records[..] else {
            debug!(
                "No explanation from {domain}: {} TXT records",
                records.len(),
            );
            return None;
        };

        match self.expand_explanation(ctx, record).await {
            Ok(explanation) => Some(explanation),
            Err(e) => {
                debug!("Bad explanation at {domain}: {e}");
                None
            },
        }
    }

    async fn expand_macro_string(
        &self,
        ctx: &Context,
        scope: Scope,
        ms: MacroString<'_>,
    ) -> Result<String, Error> {
        // Parse everything up front so that syntax errors never cost a DNS
        // query.
        let elements = ms
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                debug!("Malformed macro string {:?}: {e}", ms.as_str());
                Error::from(e)
            })?;

        let mut validated_name = None::<String>;
        let mut ret = String::with_capacity(ms.as_str().len());
        for element in elements {
            let me = match element {
                MacroElement::Literal(s) => {
                    ret.push_str(s);
                    continue;
                },
                MacroElement::Expand(me) => me,
            };

            if Scope::DomainSpec == scope && me.kind.is_exp_only() {
                debug!(
                    "%{{{}}} used outside explanation in {:?}",
                    me.kind.letter(),
                    ms.as_str(),
                );
                return Err(Error::ExpOnlyMacro(me.kind.letter()));
            }

            let value = if Macro::Ptr == me.kind {
                if validated_name.is_none() {
                    validated_name = Some(
                        self.find_validated_name(ctx)
                            .await?
                            .unwrap_or_else(|| "unknown".to_owned()),
                    );
                }
                Cow::Borrowed(validated_name.as_deref().unwrap_or("unknown"))
            } else {
                ctx.binding(me.kind)
                    .ok_or(Error::UnboundMacro(me.kind.letter()))?
            };

            let value = transform(&value, &me);
            trace!("%{{{}}} => {value:?}", me.kind.letter());
            if me.url_escape {
                ret.extend(utf8_percent_encode(&value, URL_ESCAPE));
            } else {
                ret.push_str(&value);
            }
        }

        Ok(ret)
    }

    /// Identifies the "validated domain name" of the client for `%{p}`.
    ///
    /// This is the process described in RFC 7208 § 5.5, except that names
    /// unrelated to the current domain are still acceptable as a last resort
    /// (§ 7.3).
    async fn find_validated_name(
        &self,
        ctx: &Context,
    ) -> Result<Option<String>, Error> {
        let ip = ctx.ip();
        let names =
            match self.with_timeout(self.resolver.reverse_lookup(ip)).await {
                Ok(names) => names,
                Err(LookupError::NotFound) => return Ok(None),
                Err(e) => {
                    warn!("PTR lookup for {ip} failed: {e}");
                    return Err(Error::ResolutionFailure(e));
                },
            };

        let target = ctx.domain().trim_end_matches('.');
        let mut candidates = names
            .iter()
            .take(self.max_ptr_names)
            .map(|name| name.trim_end_matches('.'))
            .map(|name| (domain_relation(name, target), name))
            .collect::<Vec<_>>();
        // Prefer an exact match on the domain, then subdomains. The sort is
        // stable, so DNS order is otherwise retained.
        candidates.sort_by_key(|&(relation, _)| relation);

        for (_, candidate) in candidates {
            let matches = match ip {
                IpAddr::V4(ip) => self
                    .with_timeout(self.resolver.ipv4_lookup(candidate))
                    .await
                    .map(|addrs| addrs.contains(&ip)),
                IpAddr::V6(ip) => self
                    .with_timeout(self.resolver.ipv6_lookup(candidate))
                    .await
                    .map(|addrs| addrs.contains(&ip)),
            };

            match matches {
                Ok(true) => return Ok(Some(candidate.to_owned())),
                Ok(false) => {},
                // > If a DNS error occurs while doing an A RR lookup, then
                // > that domain name is skipped and the search continues.
                Err(e) => debug!("Skipping PTR name {candidate}: {e}"),
            }
        }

        Ok(None)
    }

    async fn with_timeout<T>(
        &self,
        lookup: impl Future<Output = Result<T, LookupError>>,
    ) -> Result<T, LookupError> {
        match self.lookup_timeout {
            // tokio's timer panics outside a runtime.
            Some(timeout) if tokio::runtime::Handle::try_current().is_ok() => {
                match tokio::time::timeout(timeout, lookup).await {
                    Ok(result) => result,
                    Err(_) => Err(LookupError::Timeout),
                }
            },
            _ => lookup.await,
        }
    }
}

/// Applies the split/reverse/keep/join transformation of RFC 7208 § 7.3.
fn transform<'s>(value: &'s str, me: &MacroExpand<'_>) -> Cow<'s, str> {
    if !me.reverse && me.keep_parts.is_none() && me.delimiters.is_empty() {
        return Cow::Borrowed(value);
    }

    let effective_delimiters = if me.delimiters.is_empty() {
        "."
    } else {
        me.delimiters
    };
    let is_delimiter = |c: char| effective_delimiters.contains(c);
    let keep_parts = me.keep_parts.unwrap_or(usize::MAX);

    // Splitting is done naïvely, with no special handling for adjacent
    // delimiters or delimiters at the start/end of the string.
    if me.reverse {
        let it = value.rsplit(is_delimiter);
        let parts = it.clone().count();
        Cow::Owned(it.skip(parts.saturating_sub(keep_parts)).join("."))
    } else {
        let it = value.split(is_delimiter);
        let parts = it.clone().count();
        Cow::Owned(it.skip(parts.saturating_sub(keep_parts)).join("."))
    }
}

/// Removes labels from the left of `name` until it is no longer than 253
/// characters.
fn truncate_domain(mut name: String) -> String {
    while name.len() > MAX_DOMAIN_LEN {
        let Some(dot) = name.find('.') else {
            break;
        };
        name.drain(..=dot);
    }

    name
}

/// `target` must not have a trailing dot.
fn domain_relation(name: &str, target: &str) -> DomainRelation {
    if name.eq_ignore_ascii_case(target) {
        return DomainRelation::Same;
    }

    let Some(split) = name.len().checked_sub(target.len() + 1) else {
        return DomainRelation::Unrelated;
    };

    match (name.get(split..split + 1), name.get(split + 1..)) {
        (Some("."), Some(suffix)) if suffix.eq_ignore_ascii_case(target) => {
            DomainRelation::Subdomain
        },
        _ => DomainRelation::Unrelated,
    }
}
