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

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;

use chrono::prelude::*;

use crate::spf::context::{Context, ContextBuilder};
use crate::support::dns::{LookupError, Resolver};

/// The context used by the examples in RFC 7208 § 7.4.
pub fn rfc7208_context() -> Context {
    ContextBuilder::new(
        "strong-bad@email.example.com",
        "email.example.com",
        Ipv4Addr::new(192, 0, 2, 3).into(),
    )
    .helo_domain("email.example.com")
    .receiving_host("unused")
    .build()
}

/// A context with every binding set to a fixed value.
pub fn full_context() -> Context {
    ContextBuilder::new(
        "john@example.com",
        "domain.example.org",
        "dead::beef".parse().unwrap(),
    )
    .helo_domain("helo.example.com")
    .receiving_host("receiver.example.net")
    .timestamp(DateTime::from_timestamp(42, 0).unwrap())
    .build()
}

/// A resolver answering from fixed tables.
///
/// Anything not in the tables is `NotFound`. Every query is recorded in
/// `queries`.
#[derive(Debug, Default)]
pub struct StaticResolver {
    pub ptr: HashMap<IpAddr, Result<Vec<String>, LookupError>>,
    pub a: HashMap<String, Result<Vec<Ipv4Addr>, LookupError>>,
    pub aaaa: HashMap<String, Result<Vec<Ipv6Addr>, LookupError>>,
    pub txt: HashMap<String, Result<Vec<String>, LookupError>>,
    /// If true, every query waits forever.
    pub hang: bool,
    pub queries: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn with_ptr(mut self, ip: &str, names: &[&str]) -> Self {
        self.ptr.insert(ip.parse().unwrap(), Ok(strings(names)));
        self
    }

    pub fn with_ptr_error(mut self, ip: &str, error: LookupError) -> Self {
        self.ptr.insert(ip.parse().unwrap(), Err(error));
        self
    }

    pub fn with_a(mut self, name: &str, addrs: &[&str]) -> Self {
        self.a.insert(
            name.to_owned(),
            Ok(addrs.iter().map(|a| a.parse().unwrap()).collect()),
        );
        self
    }

    pub fn with_a_error(mut self, name: &str, error: LookupError) -> Self {
        self.a.insert(name.to_owned(), Err(error));
        self
    }

    pub fn with_aaaa(mut self, name: &str, addrs: &[&str]) -> Self {
        self.aaaa.insert(
            name.to_owned(),
            Ok(addrs.iter().map(|a| a.parse().unwrap()).collect()),
        );
        self
    }

    pub fn with_txt(mut self, name: &str, records: &[&str]) -> Self {
        self.txt.insert(name.to_owned(), Ok(strings(records)));
        self
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    async fn record(&self, query: String) {
        self.queries.lock().unwrap().push(query);
        if self.hang {
            std::future::pending::<()>().await;
        }
    }
}

impl Resolver for StaticResolver {
    async fn reverse_lookup(
        &self,
        ip: IpAddr,
    ) -> Result<Vec<String>, LookupError> {
        self.record(format!("PTR {ip}")).await;
        found(self.ptr.get(&ip))
    }

    async fn ipv4_lookup(
        &self,
        name: &str,
    ) -> Result<Vec<Ipv4Addr>, LookupError> {
        self.record(format!("A {name}")).await;
        found(self.a.get(name))
    }

    async fn ipv6_lookup(
        &self,
        name: &str,
    ) -> Result<Vec<Ipv6Addr>, LookupError> {
        self.record(format!("AAAA {name}")).await;
        found(self.aaaa.get(name))
    }

    async fn txt_lookup(&self, name: &str) -> Result<Vec<String>, LookupError> {
        self.record(format!("TXT {name}")).await;
        found(self.txt.get(name))
    }
}

fn found<V: Clone>(
    entry: Option<&Result<V, LookupError>>,
) -> Result<V, LookupError> {
    entry.cloned().unwrap_or(Err(LookupError::NotFound))
}

fn strings(s: &[&str]) -> Vec<String> {
    s.iter().map(|&s| s.to_owned()).collect()
}
