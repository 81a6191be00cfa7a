/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

/// Looks up the host serving a DNS SRV name.
pub trait SrvResolver: Send + Sync {
    /// Resolves a name like `_xmpp-client._tcp.example.com` into the host
    /// name of the preferred target. Returns None if there is no usable
    /// record, and the caller falls back to the domain itself.
    fn resolve_srv(&self, name: &str) -> Option<String>;
}

#[cfg(feature = "dns")]
pub use hickory::DnsSrvResolver;

#[cfg(feature = "dns")]
mod hickory {
    use hickory_resolver::Resolver;
    use hickory_resolver::config::ResolverConfig;
    use hickory_resolver::name_server::TokioConnectionProvider;
    use tracing::debug;
    use tracing::warn;

    use super::SrvResolver;

    /// SRV resolver using the hickory resolver on a private runtime.
    #[derive(Debug, Default, Clone)]
    pub struct DnsSrvResolver {
        config: ResolverConfig,
    }

    impl DnsSrvResolver {
        pub fn new() -> Self {
            DnsSrvResolver::default()
        }

        pub fn with_config(config: ResolverConfig) -> Self {
            DnsSrvResolver { config }
        }
    }

    impl SrvResolver for DnsSrvResolver {
        fn resolve_srv(&self, name: &str) -> Option<String> {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "cannot start resolver runtime");
                    return None;
                }
            };
            runtime.block_on(async {
                let resolver = Resolver::builder_with_config(
                    self.config.clone(),
                    TokioConnectionProvider::default(),
                )
                .build();
                let lookup = match resolver.srv_lookup(name).await {
                    Ok(lookup) => lookup,
                    Err(err) => {
                        debug!(name, error = %err, "SRV lookup failed");
                        return None;
                    }
                };
                // Lowest priority first, then the highest weight
                let best = lookup
                    .iter()
                    .filter(|srv| {
                        let target = srv.target().to_utf8();
                        target != "." && !target.is_empty()
                    })
                    .min_by(|a, b| {
                        a.priority()
                            .cmp(&b.priority())
                            .then(b.weight().cmp(&a.weight()))
                    })?;
                let host = best.target().to_utf8().trim_end_matches('.').to_string();
                debug!(name, host = %host, "SRV lookup");
                Some(host)
            })
        }
    }
}
