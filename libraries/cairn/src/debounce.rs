//! # Debouncer
//! A single worker task per effect (local write, remote push). Requests that arrive while the worker is waiting
//! push its deadline back; when the deadline passes, the effect runs once and settles every request received so far.
//!
//! Because one worker runs the effect, effects never overlap and never complete out of order. The effect reads the
//! store's state when it fires rather than when it was requested, so it always carries the newest snapshot.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use crate::{error::StoreError, lock, store::Phase};

pub(crate) struct Fire {
    /// Run even if the state hasn't changed since the last successful run.
    pub force: bool,
    /// Mutation sequence number of the last run that succeeded.
    pub last_landed: Option<u64>,
}

pub(crate) struct Fired {
    /// Mutation sequence number of the snapshot the effect used.
    pub seq: u64,
    pub outcome: Result<(), StoreError>,
}

pub(crate) type Job = Box<dyn Fn(Fire) -> BoxFuture<'static, Fired> + Send + Sync>;

#[derive(Clone, Debug)]
struct Settled {
    /// Every ticket up to and including this one has been settled.
    covered: u64,
    /// Every ticket up to and including this one was covered by a run that succeeded. Runs read the
    /// newest state, so a success also lands the changes of tickets an earlier failed run covered.
    landed: u64,
    /// Outcome of the latest run.
    outcome: Result<(), StoreError>,
}

struct Request {
    ticket: u64,
    force: bool,
}

pub(crate) struct Debouncer {
    name: &'static str,
    next_ticket: AtomicU64,
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    settled: watch::Receiver<Settled>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Spawns the worker. It will not run the effect until `gate` reports [`Phase::Ready`].
    pub(crate) fn spawn(
        name: &'static str,
        delay: Duration,
        gate: watch::Receiver<Phase>,
        job: Job,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = watch::channel(Settled {
            covered: 0,
            landed: 0,
            outcome: Ok(()),
        });
        let worker = tokio::spawn(run(name, delay, requests_rx, gate, job, settled_tx));

        Self {
            name,
            next_ticket: AtomicU64::new(0),
            requests: Mutex::new(Some(requests_tx)),
            settled: settled_rx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Asks for the effect to run after the debounce delay, or right away if `force` is set.
    pub(crate) fn request(&self, force: bool) -> Ticket {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let sent = lock(&self.requests)
            .as_ref()
            .is_some_and(|requests| requests.send(Request { ticket, force }).is_ok());
        if !sent {
            log::warn!("{} worker has shut down, dropping request {ticket}", self.name);
        }
        Ticket {
            id: ticket,
            settled: self.settled.clone(),
        }
    }

    /// Stops the worker. Unsettled tickets resolve to [`StoreError::Disposed`].
    pub(crate) fn shutdown(&self) {
        lock(&self.requests).take();
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}

async fn run(
    name: &'static str,
    delay: Duration,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut gate: watch::Receiver<Phase>,
    job: Job,
    settled: watch::Sender<Settled>,
) {
    let mut wanted: u64 = 0;
    let mut covered: u64 = 0;
    let mut landed: u64 = 0;
    let mut last_landed = None;

    while let Some(first) = requests.recv().await {
        wanted = wanted.max(first.ticket);
        let mut force = first.force;

        if !force {
            let deadline = tokio::time::sleep(delay);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    next = requests.recv() => match next {
                        Some(request) => {
                            wanted = wanted.max(request.ticket);
                            if request.force {
                                force = true;
                                break;
                            }
                            deadline.as_mut().reset(Instant::now() + delay);
                        }
                        None => break,
                    },
                }
            }
        }

        // a late request that an earlier run already covered
        if wanted <= covered && !force {
            continue;
        }

        if gate.wait_for(|phase| *phase == Phase::Ready).await.is_err() {
            log::debug!("{name} worker stopping: store dropped before it was ready");
            break;
        }

        let fired = job(Fire { force, last_landed }).await;
        covered = wanted;
        if fired.outcome.is_ok() {
            last_landed = Some(fired.seq);
            landed = covered;
        }
        settled.send_replace(Settled {
            covered,
            landed,
            outcome: fired.outcome,
        });
    }
}

/// Resolves once the request it was issued for has been settled.
#[derive(Clone, Debug)]
pub(crate) struct Ticket {
    id: u64,
    settled: watch::Receiver<Settled>,
}

impl Ticket {
    /// `Ok` once a successful run has covered this ticket, whatever later runs did. Otherwise the error
    /// of the latest run, which covered this ticket and failed.
    pub(crate) async fn wait(&self) -> Result<(), StoreError> {
        let id = self.id;
        let mut settled = self.settled.clone();
        let settled = settled
            .wait_for(|settled| settled.covered >= id)
            .await
            .map_err(|_| StoreError::Disposed)?;
        if settled.landed >= id {
            return Ok(());
        }
        settled.outcome.clone()
    }
}

/// Returned by every mutation. Dropping it is fine: the write and the backup happen either way.
/// Await it to find out how they went.
#[derive(Clone, Debug)]
pub struct Pending {
    pub(crate) saved: Ticket,
    pub(crate) backed_up: Option<Ticket>,
}

impl Pending {
    /// Whether this mutation scheduled a remote backup.
    pub fn backup_scheduled(&self) -> bool {
        self.backed_up.is_some()
    }

    /// Waits for the local write that includes this mutation.
    pub async fn saved(&self) -> Result<(), StoreError> {
        self.saved.wait().await
    }

    /// Waits for the local write and, if one was scheduled, the remote backup.
    pub async fn finished(&self) -> Result<(), StoreError> {
        self.saved.wait().await?;
        if let Some(backed_up) = &self.backed_up {
            backed_up.wait().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt as _;
    use std::sync::{Arc, atomic::AtomicBool};

    fn counting_job(runs: Arc<AtomicU64>, forced: Arc<AtomicU64>) -> Job {
        Box::new(move |fire: Fire| {
            let runs = Arc::clone(&runs);
            let forced = Arc::clone(&forced);
            async move {
                let seq = runs.fetch_add(1, Ordering::SeqCst) + 1;
                if fire.force {
                    forced.fetch_add(1, Ordering::SeqCst);
                }
                Fired {
                    seq,
                    outcome: Ok(()),
                }
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_runs_once() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let runs = Arc::new(AtomicU64::new(0));
        let debouncer = Debouncer::spawn(
            "test",
            Duration::from_millis(100),
            gate,
            counting_job(Arc::clone(&runs), Arc::default()),
        );

        let tickets: Vec<_> = (0..5).map(|_| debouncer.request(false)).collect();
        for ticket in &tickets {
            ticket.wait().await.unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_request_pushes_the_deadline_back() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let runs = Arc::new(AtomicU64::new(0));
        let debouncer = Debouncer::spawn(
            "test",
            Duration::from_millis(100),
            gate,
            counting_job(Arc::clone(&runs), Arc::default()),
        );

        for _ in 0..4 {
            debouncer.request(false);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_request_skips_the_delay() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let runs = Arc::new(AtomicU64::new(0));
        let forced = Arc::new(AtomicU64::new(0));
        let debouncer = Debouncer::spawn(
            "test",
            Duration::from_secs(60),
            gate,
            counting_job(Arc::clone(&runs), Arc::clone(&forced)),
        );

        let start = Instant::now();
        debouncer.request(false);
        debouncer.request(true).wait().await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(forced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_gate() {
        let (phase, gate) = watch::channel(Phase::Loading);
        let runs = Arc::new(AtomicU64::new(0));
        let debouncer = Debouncer::spawn(
            "test",
            Duration::from_millis(10),
            gate,
            counting_job(Arc::clone(&runs), Arc::default()),
        );

        let ticket = debouncer.request(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        phase.send_replace(Phase::Ready);
        ticket.wait().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reach_every_covered_ticket() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let debouncer = Debouncer::spawn(
            "test",
            Duration::from_millis(10),
            gate,
            Box::new(|_: Fire| {
                async {
                    Fired {
                        seq: 1,
                        outcome: Err(StoreError::Encode("boom".into())),
                    }
                }
                .boxed()
            }),
        );

        let first = debouncer.request(false);
        let second = debouncer.request(false);

        assert_eq!(first.wait().await, Err(StoreError::Encode("boom".into())));
        assert_eq!(second.wait().await, Err(StoreError::Encode("boom".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn a_landed_ticket_stays_ok_after_later_failures() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let failing = Arc::new(AtomicBool::new(false));
        let debouncer = Debouncer::spawn("test", Duration::from_millis(10), gate, {
            let failing = Arc::clone(&failing);
            Box::new(move |_: Fire| {
                let fail = failing.load(Ordering::SeqCst);
                async move {
                    Fired {
                        seq: 1,
                        outcome: if fail {
                            Err(StoreError::Encode("boom".into()))
                        } else {
                            Ok(())
                        },
                    }
                }
                .boxed()
            })
        });

        let first = debouncer.request(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        failing.store(true, Ordering::SeqCst);
        let second = debouncer.request(false);

        assert_eq!(second.wait().await, Err(StoreError::Encode("boom".into())));
        assert_eq!(first.wait().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn a_later_success_lands_earlier_failed_tickets() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let failing = Arc::new(AtomicBool::new(true));
        let debouncer = Debouncer::spawn("test", Duration::from_millis(10), gate, {
            let failing = Arc::clone(&failing);
            Box::new(move |_: Fire| {
                let fail = failing.load(Ordering::SeqCst);
                async move {
                    Fired {
                        seq: 1,
                        outcome: if fail {
                            Err(StoreError::Encode("boom".into()))
                        } else {
                            Ok(())
                        },
                    }
                }
                .boxed()
            })
        });

        let first = debouncer.request(false);
        assert!(first.wait().await.is_err());

        failing.store(false, Ordering::SeqCst);
        debouncer.request(false).wait().await.unwrap();

        assert_eq!(first.wait().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disposes_unsettled_tickets() {
        let (_phase, gate) = watch::channel(Phase::Ready);
        let debouncer = Debouncer::spawn(
            "test",
            Duration::from_secs(5),
            gate,
            counting_job(Arc::default(), Arc::default()),
        );

        let ticket = debouncer.request(false);
        debouncer.shutdown();

        assert_eq!(ticket.wait().await, Err(StoreError::Disposed));
        assert_eq!(debouncer.request(true).wait().await, Err(StoreError::Disposed));
    }
}
