//! Pump worker loop.
//!
//! A worker owns its operator, and with it every open window of the pump.
//! It runs on a blocking thread: it parks on the inbox, folds each row into
//! the operator and dispatches the resulting rows to the target stream,
//! stalling there while a `Block` queue is full. The stop flag is checked
//! before every row and while stalled.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use sluice_core::plan::{Emission, Operator, Outcome};
use sluice_core::queue::DeliveryQueue;
use sluice_core::Row;

use super::PumpShared;
use crate::catalog::StreamEntry;

pub(super) struct Worker {
    pub(super) name: Arc<str>,
    pub(super) inbox: Arc<DeliveryQueue<Row>>,
    pub(super) output: Arc<StreamEntry>,
    pub(super) operator: Operator,
    pub(super) shared: Arc<PumpShared>,
    pub(super) stop: Arc<AtomicBool>,
}

impl Worker {
    pub(super) fn run(mut self) {
        debug!(pump = %self.name, target = %self.output.name(), "pump worker started");
        while !self.stop.load(Ordering::Acquire) {
            let Ok(row) = self.inbox.pop_blocking() else {
                break;
            };
            if self.stop.load(Ordering::Acquire) || self.process(&row).is_break() {
                break;
            }
        }
        debug!(
            pump = %self.name,
            open_windows = self.operator.open_windows(),
            "pump worker stopped, window state dropped"
        );
    }

    fn process(&mut self, row: &Row) -> ControlFlow<()> {
        let windowed = matches!(self.operator, Operator::Window(_));
        let metrics = &self.shared.metrics;
        metrics.record_input();
        let outcome = self.operator.process(row);
        metrics.set_open_windows(self.operator.open_windows());

        match outcome {
            Ok(Outcome::Late) => {
                let late_rows = metrics.record_late();
                debug!(
                    pump = %self.name,
                    event_time = ?row.event_time(),
                    late_rows,
                    "dropping late row"
                );
            }
            Ok(Outcome::Emitted(emissions)) => {
                for emission in emissions {
                    match emission {
                        Emission::Row(out) => {
                            let dispatch = self.output.dispatch(&out, &self.stop);
                            if dispatch.cancelled {
                                return ControlFlow::Break(());
                            }
                            if dispatch.rejected > 0 {
                                metrics.record_dropped(dispatch.rejected);
                            }
                            metrics.record_output(windowed);
                        }
                        Emission::Aborted {
                            window_start,
                            group,
                            error,
                        } => {
                            metrics.record_aborted();
                            warn!(
                                pump = %self.name,
                                window_start = %window_start,
                                group = ?group.values(),
                                error = %error,
                                "window aborted"
                            );
                            self.shared.errors.record(&error);
                        }
                    }
                }
            }
            Err(e) => {
                metrics.record_rejected();
                warn!(pump = %self.name, error = %e, "row rejected");
                self.shared.errors.record(&e);
            }
        }
        ControlFlow::Continue(())
    }
}
