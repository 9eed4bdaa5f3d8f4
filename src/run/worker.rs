//! Bounded worker pool over the package list.
//!
//! The dispatcher feeds records into a bounded channel; each worker pulls one
//! record at a time and runs the whole pipeline for it. Stopping keeps new
//! records from being queued or started; in-flight packages finish normally.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded};

use super::RunError;
use super::pipeline::Pipeline;
use super::report::{PackageReport, RunReport};
use crate::index::PackageRecord;
use crate::mirror::ConfinementViolation;

/// Process `records` on `workers` threads until done, stopped or aborted.
///
/// A confinement violation in any worker stops dispatch and is returned once
/// the in-flight packages have finished.
pub fn run_packages(
    pipeline: &Pipeline,
    records: Vec<PackageRecord>,
    workers: usize,
    stop: &AtomicBool,
) -> Result<RunReport, RunError> {
    let workers = workers.max(1);
    let (job_tx, job_rx) = bounded::<PackageRecord>(workers);
    let (result_tx, result_rx) = unbounded::<PackageReport>();
    let abort = AtomicBool::new(false);
    let violation: Mutex<Option<ConfinementViolation>> = Mutex::new(None);
    let cancelled = AtomicBool::new(false);

    thread::scope(|s| {
        for i in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let abort = &abort;
            let cancelled = &cancelled;
            let violation = &violation;
            thread::Builder::new()
                .name(format!("elmirror-worker-{}", i))
                .spawn_scoped(s, move || {
                    for record in job_rx.iter() {
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        if stop.load(Ordering::SeqCst) {
                            cancelled.store(true, Ordering::SeqCst);
                            break;
                        }
                        match pipeline.mirror_package(&record) {
                            Ok(outcome) => {
                                log::info!("{}: {}", record.name, outcome);
                                let _ = result_tx.send(PackageReport {
                                    name: record.name,
                                    outcome,
                                });
                            }
                            Err(v) => {
                                log::error!("Aborting run: {}", v);
                                abort.store(true, Ordering::SeqCst);
                                if let Ok(mut slot) = violation.lock() {
                                    slot.get_or_insert(v);
                                }
                                break;
                            }
                        }
                    }
                })
                .expect("failed to spawn worker thread");
        }
        drop(job_rx);
        drop(result_tx);

        for record in records {
            if abort.load(Ordering::SeqCst) {
                break;
            }
            if stop.load(Ordering::SeqCst) {
                log::warn!("Stop requested, not starting remaining packages");
                cancelled.store(true, Ordering::SeqCst);
                break;
            }
            // Fails only once every worker has exited.
            if job_tx.send(record).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    let violation = violation.into_inner().unwrap_or_else(|e| e.into_inner());
    if let Some(v) = violation {
        return Err(RunError::Confinement(v));
    }

    Ok(RunReport {
        packages: result_rx.iter().collect(),
        cancelled: cancelled.into_inner(),
    })
}
