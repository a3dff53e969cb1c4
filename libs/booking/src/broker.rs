//! Wiring of the booking services over a set of backends

use common::cache::{CredentialCache, MemoryCache, RedisPool};
use common::database::{self, init_pool};
use common::error::{CacheError, DatabaseError};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::credentials::{CredentialNamespace, OneTimeCodes};
use crate::error::{BookingError, BookingResult};
use crate::ledger::EscrowLedger;
use crate::meeting::{MEETING_KEY_PREFIX, MeetingVerifier};
use crate::orders::OrderService;
use crate::repositories::memory::{MemoryAccountStore, MemoryCandidateStore, MemoryOrderStore};
use crate::repositories::postgres::{PgAccountStore, PgCandidateStore, PgOrderStore};
use crate::repositories::{AccountStore, CandidateStore, OrderStore};

/// Storage and cache implementations the services run on
#[derive(Clone)]
pub struct Backends {
    pub orders: Arc<dyn OrderStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub candidates: Arc<dyn CandidateStore>,
    pub cache: Arc<dyn CredentialCache>,
}

impl Backends {
    /// Everything in process memory
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(MemoryOrderStore::new()),
            accounts: Arc::new(MemoryAccountStore::new()),
            candidates: Arc::new(MemoryCandidateStore::new()),
            cache: Arc::new(MemoryCache::new()),
        }
    }

    /// PostgreSQL stores with a Redis credential cache
    pub fn postgres(pool: PgPool, redis: RedisPool) -> Self {
        Self {
            orders: Arc::new(PgOrderStore::new(pool.clone())),
            accounts: Arc::new(PgAccountStore::new(pool.clone())),
            candidates: Arc::new(PgCandidateStore::new(pool)),
            cache: Arc::new(redis),
        }
    }
}

/// Entry point to the booking core
#[derive(Clone)]
pub struct Broker {
    orders: OrderService,
    ledger: EscrowLedger,
    meetings: MeetingVerifier,
    one_time_codes: OneTimeCodes,
}

impl Broker {
    pub fn new(backends: Backends, settings: &Settings) -> Self {
        let ledger = EscrowLedger::new(backends.accounts, settings.accounts.clone());
        let orders = OrderService::new(backends.orders, backends.candidates, ledger.clone());
        let meeting_keys = CredentialNamespace::new(
            backends.cache.clone(),
            MEETING_KEY_PREFIX,
            settings.credentials.meeting_proof_ttl(),
        );
        let meetings = MeetingVerifier::new(orders.clone(), ledger.clone(), meeting_keys);
        let one_time_codes =
            OneTimeCodes::new(backends.cache, settings.credentials.one_time_code_ttl());

        Self {
            orders,
            ledger,
            meetings,
            one_time_codes,
        }
    }

    /// Connect to PostgreSQL and Redis and check both are reachable
    pub async fn connect(settings: &Settings) -> BookingResult<Self> {
        let pool = init_pool(&settings.database).await?;
        if !database::health_check(&pool).await? {
            return Err(BookingError::Database(DatabaseError::Configuration(
                "database health check failed".to_string(),
            )));
        }
        info!("Database connection successful");

        let redis = RedisPool::new(&settings.redis).await?;
        if !redis.health_check().await? {
            return Err(BookingError::Cache(CacheError::Unavailable(
                "redis did not answer PING".to_string(),
            )));
        }
        info!("Redis connection successful");

        Ok(Self::new(Backends::postgres(pool, redis), settings))
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    pub fn ledger(&self) -> &EscrowLedger {
        &self.ledger
    }

    pub fn meetings(&self) -> &MeetingVerifier {
        &self.meetings
    }

    pub fn one_time_codes(&self) -> &OneTimeCodes {
        &self.one_time_codes
    }
}
