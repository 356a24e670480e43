//! Write-through instrument metadata cache.
//!
//! Formatting rules (ticks, minimums, decimal counts) change rarely; they
//! are served from memory, backed by the `instrument_metadata_cache` table,
//! and refreshed from the exchange when the TTL lapses. A refresh failure
//! leaves stale-but-usable data in place.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::InstrumentRepository;
use crate::domain::types::Instrument;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct InstrumentCache {
    exchange: Arc<dyn ExchangeClient>,
    repo: Arc<dyn InstrumentRepository>,
    ttl: Duration,
    memory: RwLock<HashMap<String, (Instrument, DateTime<Utc>)>>,
}

impl InstrumentCache {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        repo: Arc<dyn InstrumentRepository>,
        ttl: Duration,
    ) -> Self {
        Self {
            exchange,
            repo,
            ttl,
            memory: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, refreshed_at: DateTime<Utc>) -> bool {
        let age = Utc::now() - refreshed_at;
        age.to_std().map(|age| age <= self.ttl).unwrap_or(true)
    }

    /// Resolve metadata for one symbol. `Ok(None)` means the exchange does
    /// not know the instrument (or metadata is temporarily unavailable);
    /// callers skip the symbol rather than guessing ticks.
    pub async fn get(&self, symbol: &str) -> Result<Option<Instrument>> {
        {
            let memory = self.memory.read().await;
            if let Some((instrument, refreshed_at)) = memory.get(symbol)
                && self.is_fresh(*refreshed_at)
            {
                return Ok(Some(instrument.clone()));
            }
        }

        // Database hit keeps process restarts cheap.
        if let Some((instrument, refreshed_at)) = self.repo.get(symbol).await?
            && self.is_fresh(refreshed_at)
        {
            self.memory
                .write()
                .await
                .insert(symbol.to_string(), (instrument.clone(), refreshed_at));
            return Ok(Some(instrument));
        }

        match self.refresh_all().await {
            Ok(()) => {}
            Err(e) => {
                warn!("Instrument metadata refresh failed: {}", e);
                // Serve stale data when the exchange is unreachable.
                if let Some((instrument, _)) = self.repo.get(symbol).await? {
                    return Ok(Some(instrument));
                }
                return Ok(None);
            }
        }

        Ok(self
            .memory
            .read()
            .await
            .get(symbol)
            .map(|(instrument, _)| instrument.clone()))
    }

    /// Pull the full instrument list and write it through to the database.
    pub async fn refresh_all(&self) -> Result<(), ExchangeError> {
        let instruments = self.exchange.get_instruments().await?;
        let refreshed_at = Utc::now();

        if let Err(e) = self.repo.upsert_all(&instruments, refreshed_at).await {
            warn!("Failed to persist instrument metadata: {}", e);
        }

        let mut memory = self.memory.write().await;
        memory.clear();
        for instrument in instruments {
            memory.insert(instrument.symbol.clone(), (instrument, refreshed_at));
        }
        info!("Instrument metadata refreshed ({} symbols)", memory.len());
        Ok(())
    }
}
