//! Demo command implementation.
//!
//! Each scenario runs against an in-process replica reached through the
//! loopback connector. A background orderer cuts blocks the way a replica
//! set would, so synchronous and asynchronous commits both complete.

use clap::ValueEnum;
use ledgerkv_client::{
    ClientConfig, CommitOutcome, ConnectionConfig, DataTx, EvidenceStore, HttpConnector,
    LoopbackClient, LoopbackServer, ReceiptExt, ReplicaEndpoint, Session,
};
use ledgerkv_protocol::{Flag, HmacSigner, Signer, TxReceipt};
use ledgerkv_testkit::{demo_replica, signer_for, MemoryReplica, ReplicaConfig, DEMO_DB};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

type DemoResult<T> = Result<T, Box<dyn std::error::Error>>;
type DemoConnector = HttpConnector<LoopbackClient<ReplicaHandle>>;

const DEMO_USER: &str = "alice";
const BLOCK_SIZE: usize = 2;
const BLOCK_INTERVAL: Duration = Duration::from_millis(5);

/// Demo scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Put, read back, update and delete keys
    Simple,
    /// Two transactions race to update the same key
    Conflict,
    /// Submit without waiting, then collect the receipt
    Async,
}

/// Outcome of one committed transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TxSummary {
    /// What the transaction did.
    pub label: String,
    /// Transaction id.
    pub tx_id: String,
    /// Validation flag.
    pub flag: Flag,
    /// Reason the transaction was invalidated.
    pub reason: String,
}

/// Everything a scenario committed and observed.
#[derive(Debug, Default, Serialize)]
pub struct DemoReport {
    /// Committed transactions in commit order.
    pub transactions: Vec<TxSummary>,
    /// Notable outcomes, such as both racing transactions being invalid.
    pub observations: Vec<String>,
}

impl DemoReport {
    fn flag_of(&self, label: &str) -> Option<Flag> {
        self.transactions
            .iter()
            .find(|t| t.label == label)
            .map(|t| t.flag)
    }
}

/// Routes loopback requests to the in-process replica.
#[derive(Clone)]
struct ReplicaHandle(Arc<MemoryReplica>);

impl LoopbackServer for ReplicaHandle {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body).map_err(|e| e.to_string())
    }
}

/// Cuts blocks from queued transactions until dropped.
struct Orderer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Orderer {
    fn start(replica: Arc<MemoryReplica>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                replica.seal_all();
                thread::sleep(BLOCK_INTERVAL);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Orderer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct DemoEnv {
    session: Session<DemoConnector>,
    evidence: Option<EvidenceStore>,
    report: DemoReport,
    _orderer: Orderer,
}

impl DemoEnv {
    fn new(evidence_dir: Option<&Path>, config_path: Option<&Path>) -> DemoResult<Self> {
        let config = match config_path {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };

        let connection = if config.connection.replica_set.is_empty() {
            ConnectionConfig::new(vec![ReplicaEndpoint::new("node1", "http://127.0.0.1:6001")])
        } else {
            config.connection.clone()
        };

        let mut replica = demo_replica(
            ReplicaConfig::new(connection.replica_set[0].id.clone())
                .with_block_size(BLOCK_SIZE)
                .with_auto_seal(false),
        );
        let signer: HmacSigner = if config.user.user_id.is_empty() {
            signer_for(DEMO_USER)
        } else {
            let signer = config.user.load_signer()?;
            let key = std::fs::read(&config.user.key_path)?;
            replica = replica.with_user(signer.user_id(), key);
            signer
        };
        let replica = Arc::new(replica);

        let connector = HttpConnector::new(
            &connection,
            LoopbackClient::new(ReplicaHandle(Arc::clone(&replica))),
        )?;
        println!(
            "Opening session as {} to replica {}",
            signer.user_id(),
            connection.replica_set[0].id
        );
        let session = Session::open(connector, Arc::new(signer), config.session.clone())?;

        Ok(Self {
            session,
            evidence: evidence_dir.map(EvidenceStore::new),
            report: DemoReport::default(),
            _orderer: Orderer::start(replica),
        })
    }

    fn tx(&self) -> DemoResult<DataTx<DemoConnector>> {
        Ok(self.session.data_tx()?)
    }

    fn put(&self, tx: &mut DataTx<DemoConnector>, key: &str, value: &str) -> DemoResult<()> {
        println!("Putting {} = {}", key, value);
        tx.put(DEMO_DB, key, value.as_bytes().to_vec(), None)?;
        Ok(())
    }

    fn get(&self, tx: &mut DataTx<DemoConnector>, key: &str) -> DemoResult<Option<String>> {
        let value = tx.get(DEMO_DB, key)?;
        match &value {
            Some(v) => {
                let version = v.version.map_or_else(|| "-".to_string(), |v| v.to_string());
                println!(
                    "{} is {}, version {}",
                    key,
                    String::from_utf8_lossy(&v.value),
                    version
                );
            }
            None => println!("{} does not exist", key),
        }
        Ok(value.map(|v| String::from_utf8_lossy(&v.value).into_owned()))
    }

    fn commit_sync(&mut self, label: &str, tx: &mut DataTx<DemoConnector>) -> DemoResult<Flag> {
        println!("Committing {}", label);
        let outcome = tx.commit(true)?;
        let receipt = receipt_of(&outcome)?;
        self.record(label, &outcome, receipt)
    }

    fn record(
        &mut self,
        label: &str,
        outcome: &CommitOutcome,
        receipt: TxReceipt,
    ) -> DemoResult<Flag> {
        let verdict = receipt.verdict()?;
        info!(tx_id = %outcome.tx_id, flag = %verdict.flag, "{} validated", label);
        if verdict.is_valid {
            println!("{} ({}) is valid", label, outcome.tx_id);
        } else {
            println!(
                "{} ({}) is invalid: {}, {}",
                label, outcome.tx_id, verdict.flag, verdict.reason
            );
        }

        if let Some(store) = &self.evidence {
            store.save(&outcome.envelope, &receipt)?;
        }

        self.report.transactions.push(TxSummary {
            label: label.to_string(),
            tx_id: outcome.tx_id.clone(),
            flag: verdict.flag,
            reason: verdict.reason,
        });
        Ok(verdict.flag)
    }

    fn observe(&mut self, observation: String) {
        println!("Observation: {}", observation);
        self.report.observations.push(observation);
    }
}

fn receipt_of(outcome: &CommitOutcome) -> DemoResult<TxReceipt> {
    outcome
        .receipt
        .clone()
        .ok_or_else(|| format!("no receipt for {}", outcome.tx_id).into())
}

/// Runs a demo scenario and returns what it committed.
pub fn run(
    scenario: Scenario,
    evidence_dir: Option<&Path>,
    config: Option<&Path>,
) -> DemoResult<DemoReport> {
    let mut env = DemoEnv::new(evidence_dir, config)?;
    match scenario {
        Scenario::Simple => simple(&mut env)?,
        Scenario::Conflict => conflict(&mut env)?,
        Scenario::Async => async_commit(&mut env)?,
    }

    let stats = env.session.stats();
    println!();
    println!(
        "Submitted {} transaction(s): {} valid, {} invalid",
        stats.commits_submitted, stats.valid, stats.invalid
    );
    if let Some(store) = &env.evidence {
        println!("Evidence written to {:?}", store.root());
    }
    env.session.close()?;
    Ok(env.report)
}

fn simple(env: &mut DemoEnv) -> DemoResult<()> {
    let mut tx = env.tx()?;
    env.put(&mut tx, "key1", "val1")?;
    env.put(&mut tx, "key2", "val2")?;
    env.commit_sync("insert", &mut tx)?;

    let mut tx = env.tx()?;
    env.get(&mut tx, "key1")?;
    env.put(&mut tx, "key1", "val0")?;
    println!("Deleting key2");
    tx.delete(DEMO_DB, "key2")?;
    env.commit_sync("update", &mut tx)?;

    let mut tx = env.tx()?;
    env.get(&mut tx, "key1")?;
    env.get(&mut tx, "key2")?;
    tx.abort()?;
    Ok(())
}

fn conflict(env: &mut DemoEnv) -> DemoResult<()> {
    let mut init = env.tx()?;
    env.put(&mut init, "key1", "1")?;
    env.put(&mut init, "key2", "2")?;
    env.commit_sync("init", &mut init)?;

    // Committed one after the other: the first one wins.
    let mut tx1 = env.tx()?;
    let mut tx2 = env.tx()?;
    let v1 = increment(env, &mut tx1, "key1", 1)?;
    let v2 = increment(env, &mut tx2, "key1", 2)?;
    println!("tx1 and tx2 read the same version of key1");
    env.put(&mut tx1, "key1", &v1)?;
    env.put(&mut tx2, "key1", &v2)?;
    env.commit_sync("tx1", &mut tx1)?;
    env.commit_sync("tx2", &mut tx2)?;
    compare(env, "tx1", "tx2");

    // Submitted together: the ordering decides the winner.
    let mut tx3 = env.tx()?;
    let mut tx4 = env.tx()?;
    let v3 = increment(env, &mut tx3, "key2", 1)?;
    let v4 = increment(env, &mut tx4, "key2", 2)?;
    env.put(&mut tx3, "key2", &v3)?;
    env.put(&mut tx4, "key2", &v4)?;
    println!("Committing tx3 and tx4 without waiting");
    let out3 = tx3.commit(false)?;
    let out4 = tx4.commit(false)?;
    let r3 = env.session.await_receipt(&out3.tx_id)?;
    let r4 = env.session.await_receipt(&out4.tx_id)?;
    env.record("tx3", &out3, r3)?;
    env.record("tx4", &out4, r4)?;
    compare(env, "tx3", "tx4");
    Ok(())
}

fn increment(
    env: &DemoEnv,
    tx: &mut DataTx<DemoConnector>,
    key: &str,
    by: i64,
) -> DemoResult<String> {
    let current = env.get(tx, key)?.unwrap_or_default();
    let n: i64 = current.parse().unwrap_or(0);
    Ok((n + by).to_string())
}

fn compare(env: &mut DemoEnv, a: &str, b: &str) {
    let (Some(fa), Some(fb)) = (env.report.flag_of(a), env.report.flag_of(b)) else {
        return;
    };
    match (fa.is_valid(), fb.is_valid()) {
        (true, true) => env.observe(format!("both {} and {} are valid", a, b)),
        (false, false) => env.observe(format!("both {} and {} are invalid", a, b)),
        _ => {}
    }
}

fn async_commit(env: &mut DemoEnv) -> DemoResult<()> {
    let mut tx = env.tx()?;
    env.put(&mut tx, "key1", "val1")?;
    env.put(&mut tx, "key2", "val2")?;

    println!("Committing without waiting");
    let outcome = tx.commit(false)?;
    println!("Submitted {}, status {}", outcome.tx_id, tx.status());

    match env.session.receipt(&outcome.tx_id)? {
        Some(_) => println!("Receipt already available"),
        None => println!("Receipt pending, polling"),
    }
    let receipt = env.session.await_receipt(&outcome.tx_id)?;
    println!(
        "Receipt: block {}, index {}",
        receipt.header.number, receipt.tx_index
    );
    env.record("async", &outcome, receipt)?;

    let mut tx = env.tx()?;
    env.get(&mut tx, "key1")?;
    tx.abort()?;
    Ok(())
}
