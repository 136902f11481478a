//! Auto-charge controller driven through its sample channel.

use std::sync::Arc;
use std::time::Duration;

use rover_core::event::names;
use rover_core::sensor::CHARGE_SOURCE_HOME_BASE;
use rover_core::SensorSample;
use roverd::auto_charge::{AutoChargeController, AUTO_CHARGE_COOLDOWN};
use roverd::chassis::SerialAdapter;
use roverd::events;
use roverd::simulated::WriteLog;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const SEEK_DOCK: u8 = 143;

fn docked(charging_state: u8) -> SensorSample {
    SensorSample {
        timestamp_ms: 0,
        charging_state,
        charge_sources: CHARGE_SOURCE_HOME_BASE,
    }
}

struct Rig {
    log: WriteLog,
    samples: mpsc::Sender<SensorSample>,
    events: mpsc::Receiver<rover_core::RoverEvent>,
    cancel: CancellationToken,
}

fn rig() -> Rig {
    let log = WriteLog::new();
    let chassis = Arc::new(SerialAdapter::new(log.clone()));
    let (event_tx, events) = events::channel();
    let (samples, sample_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    tokio::spawn(AutoChargeController::new(chassis, event_tx).run(sample_rx, cancel.clone()));
    Rig {
        log,
        samples,
        events,
        cancel,
    }
}

impl Rig {
    /// Feeds one sample per second for `secs` seconds.
    async fn feed(&self, sample: SensorSample, secs: u64) {
        for _ in 0..secs {
            self.samples.send(sample).await.unwrap();
            sleep(Duration::from_secs(1)).await;
        }
    }

    fn seeks(&self) -> usize {
        self.log
            .writes()
            .iter()
            .filter(|w| w.as_slice() == [SEEK_DOCK])
            .count()
    }

    fn event_names(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(e) = self.events.try_recv() {
            out.push(e.event);
        }
        out
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_charge_seeks_dock_once_per_cooldown() {
    let mut rig = rig();
    rig.feed(docked(0), 12).await;
    assert_eq!(rig.seeks(), 1);
    assert_eq!(
        rig.event_names(),
        vec![
            names::AUTO_CHARGE_TIMER_STARTED,
            names::AUTO_CHARGE_SEEK_DOCK_ISSUED,
        ]
    );

    // still stalled, but inside the cooldown
    rig.feed(docked(0), 60).await;
    assert_eq!(rig.seeks(), 1);
    assert!(rig.event_names().is_empty());

    // past the cooldown the timer starts over
    let remaining = AUTO_CHARGE_COOLDOWN.as_secs() - 60 + 12;
    rig.feed(docked(0), remaining).await;
    assert_eq!(rig.seeks(), 2);
    rig.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_charging_resumes_before_timeout() {
    let mut rig = rig();
    rig.feed(docked(0), 5).await;
    rig.feed(docked(2), 20).await;
    assert_eq!(rig.seeks(), 0);
    assert_eq!(
        rig.event_names(),
        vec![names::AUTO_CHARGE_TIMER_STARTED, names::AUTO_CHARGE_TIMER_CLEARED]
    );
    rig.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_runs_without_any_session() {
    // nobody drains events: the controller must still act
    let rig = rig();
    for _ in 0..40 {
        rig.samples.send(docked(5)).await.unwrap();
        sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(rig.seeks(), 1);
    rig.cancel.cancel();
}
