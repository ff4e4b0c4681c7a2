//! Ordered queue of mirror writes owed after confirmed instructions.
//!
//! Writes are delivered front to back within a stream: one endpoint for one
//! wallet, or the current presale for one identifier. A failed write blocks
//! only the later writes of its own stream. Writes rejected by the backend, or
//! failing `max_attempts` times, move to the dead-letter list.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::mirror::{
    BuyPost, CurrentPresaleUpdate, MirrorApi, PresaleRecordUpsert, TokenActivityPost,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum MirrorWrite {
    UpsertPresale(PresaleRecordUpsert),
    UpdateCurrent(CurrentPresaleUpdate),
    AppendActivity(TokenActivityPost),
    RecordBuy(BuyPost),
}

/// Writes sharing a stream are delivered in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WriteStream {
    PresaleRecord(String),
    Current(u8),
    Activity(String),
    Buy(String),
}

impl MirrorWrite {
    pub fn stream(&self) -> WriteStream {
        match self {
            MirrorWrite::UpsertPresale(body) => WriteStream::PresaleRecord(body.public_key.clone()),
            MirrorWrite::UpdateCurrent(body) => WriteStream::Current(body.presale_identifier),
            MirrorWrite::AppendActivity(body) => WriteStream::Activity(body.public_key.clone()),
            MirrorWrite::RecordBuy(body) => WriteStream::Buy(body.public_key.clone()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MirrorWrite::UpsertPresale(_) => "POST /api/presale",
            MirrorWrite::UpdateCurrent(_) => "POST /api/current",
            MirrorWrite::AppendActivity(_) => "POST /api/token-activity",
            MirrorWrite::RecordBuy(_) => "POST /api/buy",
        }
    }

    pub async fn deliver<M: MirrorApi>(&self, mirror: &M) -> Result<()> {
        match self {
            MirrorWrite::UpsertPresale(body) => mirror.upsert_presale_record(body).await,
            MirrorWrite::UpdateCurrent(body) => mirror.update_current(body).await,
            MirrorWrite::AppendActivity(body) => mirror.append_activity(body).await,
            MirrorWrite::RecordBuy(body) => mirror.record_buy(body).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Signature of the instruction this write follows.
    pub signature: String,
    pub write: MirrorWrite,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub remaining: usize,
    pub dead_lettered: usize,
    pub last_error: Option<String>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.remaining == 0
    }
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<PendingWrite>,
    dead_letters: Vec<PendingWrite>,
    max_attempts: u32,
    path: Option<PathBuf>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dead_letters: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            path: None,
        }
    }
}

impl Outbox {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Loads writes left over from a previous session, if any.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let queue = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => VecDeque::new(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ClientError::Outbox(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(ClientError::Outbox(format!("{}: {e}", path.display()))),
        };
        if !queue.is_empty() {
            info!("outbox restored {} pending writes from {}", queue.len(), path.display());
        }
        Ok(Self {
            queue,
            path: Some(path),
            ..Self::default()
        })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingWrite> {
        self.queue.iter()
    }

    /// Writes given up on in this session.
    pub fn dead_letters(&self) -> &[PendingWrite] {
        &self.dead_letters
    }

    /// Deposit total of the newest undelivered presale record write for
    /// `wallet`, if one is queued.
    pub fn pending_deposit_total(&self, wallet: &str) -> Option<f64> {
        self.queue.iter().rev().find_map(|pending| match &pending.write {
            MirrorWrite::UpsertPresale(body) if body.public_key == wallet => {
                body.presale_info.deposit_token_amount
            }
            _ => None,
        })
    }

    pub fn enqueue(&mut self, signature: &str, writes: Vec<MirrorWrite>) -> Result<()> {
        self.queue.extend(writes.into_iter().map(|write| PendingWrite {
            signature: signature.to_string(),
            write,
            attempts: 0,
        }));
        self.persist()
    }

    pub async fn flush<M: MirrorApi>(&mut self, mirror: &M) -> FlushReport {
        let mut report = FlushReport::default();
        let mut blocked = HashSet::new();
        let mut index = 0;
        while index < self.queue.len() {
            let stream = self.queue[index].write.stream();
            if blocked.contains(&stream) {
                index += 1;
                continue;
            }
            match self.queue[index].write.deliver(mirror).await {
                Ok(()) => {
                    if let Some(done) = self.queue.remove(index) {
                        info!("{} synced for {}", done.write.label(), done.signature);
                    }
                    report.delivered += 1;
                }
                Err(err) => {
                    report.last_error = Some(err.to_string());
                    let pending = &mut self.queue[index];
                    pending.attempts += 1;
                    if err.is_permanent() || pending.attempts >= self.max_attempts {
                        if let Some(dead) = self.queue.remove(index) {
                            warn!(
                                "dropping {} for {} after {} attempts: {err}",
                                dead.write.label(),
                                dead.signature,
                                dead.attempts
                            );
                            self.dead_letters.push(dead);
                        }
                        report.dead_lettered += 1;
                    } else {
                        warn!(
                            "{} for {} failed (attempt {}): {err}",
                            pending.write.label(),
                            pending.signature,
                            pending.attempts
                        );
                        blocked.insert(stream);
                        index += 1;
                    }
                }
            }
        }
        report.remaining = self.queue.len();
        if let Err(err) = self.persist() {
            warn!("{err}");
        }
        report
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.queue)
            .map_err(|e| ClientError::Outbox(e.to_string()))?;
        fs::write(path, text).map_err(|e| ClientError::Outbox(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anchor_lang::prelude::Pubkey;

    use super::*;
    use crate::mirror::{CurrentPresaleResponse, PresaleRecordFields, WalletPresaleRecord};

    /// Records delivered writes. Fails the first `fail_first` of them, and
    /// rejects every write to the endpoints in `reject`.
    #[derive(Default)]
    struct Recorder {
        fail_first: Mutex<usize>,
        reject: Vec<&'static str>,
        delivered: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn failing(count: usize) -> Self {
            Self {
                fail_first: Mutex::new(count),
                ..Self::default()
            }
        }

        fn accept(&self, label: &'static str) -> Result<()> {
            if self.reject.contains(&label) {
                return Err(ClientError::MirrorRejected("400 Bad Request".into()));
            }
            let mut fail = self.fail_first.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(ClientError::Mirror("backend down".into()));
            }
            self.delivered.lock().unwrap().push(label.to_string());
            Ok(())
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl MirrorApi for Recorder {
        async fn current_presale(&self) -> Result<CurrentPresaleResponse> {
            Ok(CurrentPresaleResponse::default())
        }
        async fn update_current(&self, _: &CurrentPresaleUpdate) -> Result<()> {
            self.accept("current")
        }
        async fn presale_record(&self, _: &Pubkey) -> Result<Option<WalletPresaleRecord>> {
            Ok(None)
        }
        async fn upsert_presale_record(&self, _: &PresaleRecordUpsert) -> Result<()> {
            self.accept("presale")
        }
        async fn append_activity(&self, _: &TokenActivityPost) -> Result<()> {
            self.accept("activity")
        }
        async fn record_buy(&self, _: &BuyPost) -> Result<()> {
            self.accept("buy")
        }
        async fn presale_identifier(&self) -> Result<Option<u8>> {
            Ok(None)
        }
    }

    fn writes() -> Vec<MirrorWrite> {
        vec![
            MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::deposit(1, 5.0)),
            MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::select(1)),
        ]
    }

    fn deposit_record(wallet: &str, total: f64) -> MirrorWrite {
        MirrorWrite::UpsertPresale(PresaleRecordUpsert {
            public_key: wallet.to_string(),
            presale_info: PresaleRecordFields {
                presale_identifier: 1,
                terms: None,
                deposit_token_amount: Some(total),
                withdraw_amount: None,
                withdraw_type: None,
                signature: "sig".into(),
            },
        })
    }

    #[tokio::test]
    async fn failure_keeps_order_within_a_stream() {
        let mirror = Recorder::failing(1);
        let mut outbox = Outbox::in_memory();
        outbox.enqueue("sig", writes()).unwrap();

        let report = outbox.flush(&mirror).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 2);
        assert!(report.last_error.is_some());
        assert_eq!(outbox.pending().next().unwrap().attempts, 1);

        let report = outbox.flush(&mirror).await;
        assert!(report.is_clean());
        assert_eq!(report.delivered, 2);
        assert_eq!(mirror.delivered(), vec!["current", "current"]);
    }

    #[tokio::test]
    async fn failure_does_not_stall_other_streams() {
        let mirror = Recorder::failing(1);
        let mut outbox = Outbox::in_memory();
        outbox
            .enqueue(
                "sig",
                vec![
                    deposit_record("wallet", 25.0),
                    MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::deposit(1, 5.0)),
                    deposit_record("wallet", 28.0),
                ],
            )
            .unwrap();

        let report = outbox.flush(&mirror).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(mirror.delivered(), vec!["current"]);
        assert_eq!(outbox.pending_deposit_total("wallet"), Some(28.0));
        assert_eq!(outbox.pending_deposit_total("other"), None);

        assert!(outbox.flush(&mirror).await.is_clean());
        assert_eq!(mirror.delivered(), vec!["current", "presale", "presale"]);
    }

    #[tokio::test]
    async fn rejected_writes_are_dead_lettered() {
        let mirror = Recorder {
            reject: vec!["buy"],
            ..Recorder::default()
        };
        let mut outbox = Outbox::in_memory();
        let buy = MirrorWrite::RecordBuy(BuyPost {
            public_key: "wallet".into(),
            buy_info: crate::mirror::BuyInfo {
                presale_identifier: 1,
                token_amount: 10,
                sol_amount: 0.01,
                signature: "sig".into(),
                email: "a@b.c".into(),
                timestamp: 0,
            },
            token_activity: 10_000_000,
        });
        outbox
            .enqueue("sig", vec![buy, MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::select(1))])
            .unwrap();

        let report = outbox.flush(&mirror).await;
        assert!(report.is_clean());
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(mirror.delivered(), vec!["current"]);
        assert_eq!(outbox.dead_letters().len(), 1);
        assert_eq!(outbox.dead_letters()[0].write.label(), "POST /api/buy");
    }

    #[tokio::test]
    async fn repeated_failures_are_capped() {
        let mirror = Recorder::failing(usize::MAX);
        let mut outbox = Outbox::in_memory().with_max_attempts(3);
        outbox.enqueue("sig", writes()).unwrap();

        for _ in 0..2 {
            assert_eq!(outbox.flush(&mirror).await.remaining, 2);
        }
        let report = outbox.flush(&mirror).await;
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(outbox.dead_letters()[0].attempts, 3);
    }

    #[tokio::test]
    async fn survives_restart() {
        let path = std::env::temp_dir().join(format!("outbox-{}.json", Pubkey::new_unique()));
        {
            let mut outbox = Outbox::open(&path).unwrap();
            outbox.enqueue("sig", writes()).unwrap();
        }
        let mut outbox = Outbox::open(&path).unwrap();
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pending().next().unwrap().write, writes()[0]);

        let report = outbox.flush(&Recorder::default()).await;
        assert!(report.is_clean());
        assert!(Outbox::open(&path).unwrap().is_empty());
        fs::remove_file(&path).unwrap();
    }
}
