//! Ports onto the gateway's external collaborators.
//!
//! The core never talks to persistence, quota ledgers, or observability
//! backends directly; it consumes these trait objects and lets the host
//! process wire real implementations. The in-memory implementations
//! here back tests and single-process deployments.

use crate::cost::pricing::ModelCostInfo;
use crate::error::ErrorKind;
use crate::models::{Credential, ModelDeployment, Usage};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Mutex;
use uuid::Uuid;

/// One classified provider failure, written to the error tracker.
///
/// Records are emitted by the retry layer (one per failed attempt) and
/// by the context-binding layer (at most one per stream). The core never
/// persists them.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// Credential (virtual key) id the call ran under
    pub key_id: i64,
    /// Provider the call was dispatched to
    pub provider_id: i64,
    /// Classified failure kind
    pub kind: ErrorKind,
    /// Upstream HTTP status, when one was observed
    pub http_status: Option<u16>,
    /// Attempt index within the retry envelope (1-based)
    pub attempt: u32,
    /// Correlation id shared by all records of one call
    pub correlation_id: Uuid,
}

/// Read-only credential lookup.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve a credential by its opaque key id.
    async fn credential(&self, key_id: i64) -> Option<Credential>;
}

/// Read-only model pricing and deployment lookup.
#[async_trait::async_trait]
pub trait ModelCostStore: Send + Sync {
    /// Pricing data for a logical model alias.
    async fn cost_info(&self, alias: &str) -> Option<ModelCostInfo>;

    /// Deployment a logical model alias resolves to.
    async fn deployment(&self, alias: &str) -> Option<ModelDeployment>;
}

/// Sink for classified provider failures.
pub trait ErrorTracker: Send + Sync {
    fn record(&self, record: ErrorRecord);
}

/// Sink for computed charges and refunds.
#[async_trait::async_trait]
pub trait SpendLedger: Send + Sync {
    async fn record_charge(&self, key_id: i64, alias: &str, amount: Decimal, usage: &Usage);
    async fn record_refund(&self, key_id: i64, alias: &str, amount: Decimal);
}

/// Opaque storage for generated media payloads.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` and return a retrievable location.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> std::io::Result<String>;
    async fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
}

/// In-memory credential store for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: DashMap<i64, Credential>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: Credential) {
        self.credentials.insert(credential.id, credential);
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn credential(&self, key_id: i64) -> Option<Credential> {
        self.credentials.get(&key_id).map(|c| c.clone())
    }
}

/// In-memory model cost and deployment registry.
#[derive(Default)]
pub struct InMemoryModelCostStore {
    costs: DashMap<String, ModelCostInfo>,
    deployments: DashMap<String, ModelDeployment>,
}

impl InMemoryModelCostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_cost(&self, alias: impl Into<String>, info: ModelCostInfo) {
        self.costs.insert(alias.into(), info);
    }

    pub fn insert_deployment(&self, alias: impl Into<String>, deployment: ModelDeployment) {
        self.deployments.insert(alias.into(), deployment);
    }
}

#[async_trait::async_trait]
impl ModelCostStore for InMemoryModelCostStore {
    async fn cost_info(&self, alias: &str) -> Option<ModelCostInfo> {
        self.costs.get(alias).map(|c| c.clone())
    }

    async fn deployment(&self, alias: &str) -> Option<ModelDeployment> {
        self.deployments.get(alias).map(|d| d.clone())
    }
}

/// Error tracker that keeps records in memory, for tests and inspection.
#[derive(Default)]
pub struct RecordingErrorTracker {
    records: Mutex<Vec<ErrorRecord>>,
}

impl RecordingErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorTracker for RecordingErrorTracker {
    fn record(&self, record: ErrorRecord) {
        tracing::debug!(
            key_id = record.key_id,
            provider_id = record.provider_id,
            kind = ?record.kind,
            attempt = record.attempt,
            "tracked provider failure"
        );
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Error tracker that drops everything; used where tracking is disabled.
#[derive(Default)]
pub struct NullErrorTracker;

impl ErrorTracker for NullErrorTracker {
    fn record(&self, _record: ErrorRecord) {}
}

/// In-memory spend ledger.
#[derive(Default)]
pub struct InMemorySpendLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

/// A single ledger line.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub key_id: i64,
    pub alias: String,
    pub amount: Decimal,
    pub is_refund: bool,
}

impl InMemorySpendLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SpendLedger for InMemorySpendLedger {
    async fn record_charge(&self, key_id: i64, alias: &str, amount: Decimal, _usage: &Usage) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LedgerEntry {
                key_id,
                alias: alias.to_string(),
                amount,
                is_refund: false,
            });
        }
    }

    async fn record_refund(&self, key_id: i64, alias: &str, amount: Decimal) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LedgerEntry {
                key_id,
                alias: alias.to_string(),
                amount,
                is_refund: true,
            });
        }
    }
}

/// In-memory object store.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, (Vec<u8>, String)>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> std::io::Result<String> {
        self.objects
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(format!("mem://{key}"))
    }

    async fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|v| v.0.clone()))
    }
}
