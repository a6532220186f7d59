//! Test doubles shared by the unit tests: a recording connection and
//! recording clock/mlat engines.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::make_clock;
use crate::hooks::{ClockTracker, Connection, MlatTracker, ReceiverSyncState};
use crate::receiver::Receiver;
use crate::types::{Icao, KalmanState, ReceiverId, ResultScratch};

/// Connection double that records every outbound call.
#[derive(Default)]
pub struct RecordingConnection {
    pub traffic: Mutex<Vec<(ReceiverId, HashSet<Icao>)>>,
    pub reports: Mutex<Vec<(ReceiverId, Icao)>>,
    /// When set, report_mlat_position fails, to exercise fan-out isolation.
    pub fail_reports: bool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(RecordingConnection {
            fail_reports: true,
            ..Self::default()
        })
    }
}

impl Connection for RecordingConnection {
    fn request_traffic(&self, receiver: ReceiverId, icao_set: &HashSet<Icao>) {
        self.traffic
            .lock()
            .unwrap()
            .push((receiver, icao_set.clone()));
    }

    fn report_mlat_position(
        &self,
        receiver: ReceiverId,
        _receive_timestamp: f64,
        icao: Icao,
        _ecef: [f64; 3],
        _ecef_cov: Option<[[f64; 3]; 3]>,
        _contributors: &[ReceiverId],
        _distinct: usize,
        _dof: i32,
        _kalman_state: &KalmanState,
        _scratch: &mut ResultScratch,
    ) -> anyhow::Result<()> {
        if self.fail_reports {
            return Err(anyhow!("send buffer full"));
        }
        self.reports.lock().unwrap().push((receiver, icao));
        Ok(())
    }
}

/// Clock tracker double with an externally settable state dump.
#[derive(Clone, Default)]
pub struct RecordingClockTracker {
    pub resets: Arc<Mutex<Vec<ReceiverId>>>,
    pub disconnects: Arc<Mutex<Vec<ReceiverId>>>,
    pub state: Arc<Mutex<ReceiverSyncState>>,
}

impl ClockTracker for RecordingClockTracker {
    fn receiver_disconnect(&mut self, receiver: ReceiverId) {
        self.disconnects.lock().unwrap().push(receiver);
    }

    fn receiver_clock_reset(&mut self, receiver: ReceiverId) {
        self.resets.lock().unwrap().push(receiver);
    }

    fn receiver_sync(
        &mut self,
        _receiver: ReceiverId,
        _even_time: f64,
        _odd_time: f64,
        _even_message: &[u8],
        _odd_message: &[u8],
    ) {
    }

    fn dump_receiver_state(&self) -> ReceiverSyncState {
        self.state.lock().unwrap().clone()
    }
}

/// Mlat tracker double recording message feeds.
#[derive(Clone, Default)]
pub struct RecordingMlatTracker {
    pub messages: Arc<Mutex<Vec<(ReceiverId, Vec<u8>)>>>,
}

impl MlatTracker for RecordingMlatTracker {
    fn receiver_mlat(&mut self, receiver: ReceiverId, _timestamp: f64, message: &[u8], _utc: f64) {
        self.messages.lock().unwrap().push((receiver, message.to_vec()));
    }
}

/// Build a receiver wired to a fresh recording connection.
pub fn test_receiver(uid: ReceiverId, user: &str) -> (Receiver, Arc<RecordingConnection>) {
    let connection = RecordingConnection::new();
    let mut rng = StdRng::seed_from_u64(uid);
    let receiver = Receiver::new(
        uid,
        user.to_string(),
        None,
        connection.clone(),
        make_clock("dump1090"),
        (48.0 + uid as f64 * 0.1, 11.0, 500.0),
        false,
        "test".into(),
        &mut rng,
    );
    (receiver, connection)
}
