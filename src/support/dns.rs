//-
// Copyright (c) 2023, 2024, Jason Lingle
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

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_resolver::error::ResolveError;
use thiserror::Error;

pub use hickory_resolver::Name;

pub type TokioResolver = hickory_resolver::AsyncResolver<
    hickory_resolver::name_server::GenericConnector<
        hickory_resolver::name_server::TokioRuntimeProvider,
    >,
>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The query succeeded and returned no results.
    #[error("No records found")]
    NotFound,
    /// The query did not complete in time.
    #[error("DNS query timed out")]
    Timeout,
    /// The query failed.
    #[error("{0}")]
    Failed(String),
}

impl LookupError {
    pub fn is_temporary(&self) -> bool {
        !matches!(*self, Self::NotFound)
    }
}

/// The DNS queries needed to expand macros and fetch explanations.
///
/// Names passed in are absolute; implementations must not apply search
/// domains. Names returned have no trailing dot.
pub trait Resolver: Send + Sync {
    fn reverse_lookup(
        &self,
        ip: IpAddr,
    ) -> impl Future<Output = Result<Vec<String>, LookupError>> + Send;

    fn ipv4_lookup(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<Ipv4Addr>, LookupError>> + Send;

    fn ipv6_lookup(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<Ipv6Addr>, LookupError>> + Send;

    /// Looks up TXT records, each record's strings already concatenated.
    fn txt_lookup(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<String>, LookupError>> + Send;
}

/// `Resolver` backed by hickory's tokio resolver.
#[derive(Clone)]
pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    pub fn new(inner: TokioResolver) -> Self {
        Self { inner }
    }

    /// Creates a resolver using the system's resolver configuration
    /// (`/etc/resolv.conf` on UNIX).
    pub fn from_system_conf() -> Result<Self, LookupError> {
        hickory_resolver::AsyncResolver::tokio_from_system_conf()
            .map(Self::new)
            .map_err(|e| LookupError::Failed(e.to_string()))
    }
}

impl Resolver for HickoryResolver {
    async fn reverse_lookup(
        &self,
        ip: IpAddr,
    ) -> Result<Vec<String>, LookupError> {
        self.inner
            .reverse_lookup(ip)
            .await
            .map(|rev| rev.iter().map(|n| name_to_string(&n.0)).collect())
            .map_err(to_lookup_error)
    }

    async fn ipv4_lookup(
        &self,
        name: &str,
    ) -> Result<Vec<Ipv4Addr>, LookupError> {
        self.inner
            .ipv4_lookup(absolute_name(name)?)
            .await
            .map(|r| r.iter().map(|a| a.0).collect())
            .map_err(to_lookup_error)
    }

    async fn ipv6_lookup(
        &self,
        name: &str,
    ) -> Result<Vec<Ipv6Addr>, LookupError> {
        self.inner
            .ipv6_lookup(absolute_name(name)?)
            .await
            .map(|r| r.iter().map(|a| a.0).collect())
            .map_err(to_lookup_error)
    }

    async fn txt_lookup(&self, name: &str) -> Result<Vec<String>, LookupError> {
        self.inner
            .txt_lookup(absolute_name(name)?)
            .await
            .map(|r| {
                r.iter()
                    .map(|parts| {
                        let len = parts.iter().map(|p| p.len()).sum();
                        let mut combined = Vec::with_capacity(len);
                        for part in parts.iter() {
                            combined.extend_from_slice(part);
                        }

                        match String::from_utf8(combined) {
                            Ok(s) => s,
                            Err(e) => String::from_utf8_lossy(e.as_bytes())
                                .into_owned(),
                        }
                    })
                    .collect()
            })
            .map_err(to_lookup_error)
    }
}

fn absolute_name(name: &str) -> Result<Name, LookupError> {
    let mut name = Name::from_ascii(name)
        .map_err(|e| LookupError::Failed(e.to_string()))?;
    name.set_fqdn(true);
    Ok(name)
}

fn name_to_string(name: &Name) -> String {
    let mut s = name.to_ascii();
    if s.ends_with('.') {
        s.pop();
    }
    s
}

fn to_lookup_error(e: ResolveError) -> LookupError {
    use hickory_resolver::error::ResolveErrorKind as Rek;

    match *e.kind() {
        Rek::NoRecordsFound { .. } => LookupError::NotFound,
        Rek::Timeout => LookupError::Timeout,
        _ => LookupError::Failed(e.to_string()),
    }
}
