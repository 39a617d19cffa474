//! Simulated IOM implementing the driver call interface.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use ueidaq_core::driver::RAW_WORD_SIZE;
use ueidaq_core::{Direction, DriverResult, DriverStatus, IomDriver, MapType, SessionHandle};

use crate::errors::{FailurePlan, FailureScenario, MockOp};
use crate::pattern::synthetic_word;

/// How refreshes produce data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Deliver queued scans only.
    #[default]
    Scripted,
    /// Synthesise scans, advancing the timestamp by `timestamp_step` per scan.
    FreeRunning {
        /// Hardware ticks between consecutive scans.
        timestamp_step: u32,
    },
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Operation.
    pub op: MockOp,
    /// Session it targeted (the new handle for `open_session`).
    pub session: SessionHandle,
    /// Layer, for per-layer calls.
    pub devn: Option<u32>,
    /// Channel words, for `add_channels`.
    pub words: Vec<u32>,
}

/// Channel words registered for one layer and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredChannels {
    /// Layer slot.
    pub devn: u32,
    /// Direction.
    pub direction: Direction,
    /// Packed channel words in registration order.
    pub words: Vec<u32>,
}

#[derive(Debug)]
struct MockSession {
    map_type: MapType,
    rate_hz: f64,
    channels: Vec<RegisteredChannels>,
    requested: HashMap<u32, usize>,
    running: bool,
    input_maps: HashMap<u32, Vec<u8>>,
}

impl MockSession {
    fn input_words(&self, devn: u32) -> impl Iterator<Item = &u32> {
        self.channels
            .iter()
            .filter(move |c| c.devn == devn && c.direction == Direction::Input)
            .flat_map(|c| c.words.iter())
    }

    fn input_devns(&self) -> Vec<u32> {
        let mut devns: Vec<u32> = self
            .channels
            .iter()
            .filter(|c| c.direction == Direction::Input)
            .map(|c| c.devn)
            .collect();
        devns.dedup();
        devns
    }
}

#[derive(Debug)]
struct MockState {
    mode: MockMode,
    next_session: SessionHandle,
    sessions: HashMap<SessionHandle, MockSession>,
    scripted: HashMap<u32, VecDeque<Vec<u32>>>,
    null_maps: HashSet<u32>,
    installed: Option<HashSet<u32>>,
    max_scan_rate: f64,
    tick: u32,
    failures: FailurePlan,
    calls: Vec<MockCall>,
}

impl MockState {
    fn record(&mut self, op: MockOp, session: SessionHandle, devn: Option<u32>, words: &[u32]) {
        self.calls.push(MockCall {
            op,
            session,
            devn,
            words: words.to_vec(),
        });
    }

    fn session_mut(&mut self, session: SessionHandle) -> DriverResult<&mut MockSession> {
        self.sessions
            .get_mut(&session)
            .ok_or(DriverStatus::NoSession(session))
    }

    fn next_scan(&mut self, devn: u32, words: &[u32]) -> Option<Vec<u32>> {
        match self.mode {
            MockMode::Scripted => self.scripted.get_mut(&devn).and_then(VecDeque::pop_front),
            MockMode::FreeRunning { timestamp_step } => {
                self.tick = self.tick.wrapping_add(timestamp_step);
                let tick = self.tick;
                Some(words.iter().map(|&w| synthetic_word(w, tick)).collect())
            }
        }
    }
}

/// Simulated IOM. Clones share state.
#[derive(Debug, Clone)]
pub struct MockIom {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockIom {
    /// Scripted IOM with every slot populated.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState {
                mode: MockMode::Scripted,
                next_session: 1,
                sessions: HashMap::new(),
                scripted: HashMap::new(),
                null_maps: HashSet::new(),
                installed: None,
                max_scan_rate: 100_000.0,
                tick: 0,
                failures: FailurePlan::default(),
                calls: Vec::new(),
            })),
        }
    }

    /// Free-running IOM.
    pub fn free_running(name: &str, timestamp_step: u32) -> Self {
        let iom = Self::new(name);
        iom.set_mode(MockMode::FreeRunning { timestamp_step });
        iom
    }

    /// Switch the data mode.
    pub fn set_mode(&self, mode: MockMode) {
        self.state.lock().mode = mode;
    }

    /// Restrict the populated slots; `add_channels` on any other slot fails.
    pub fn set_installed_slots(&self, slots: &[u32]) {
        self.state.lock().installed = Some(slots.iter().copied().collect());
    }

    /// Highest scan rate the simulated clock can produce; requests above it
    /// are clamped.
    pub fn set_max_scan_rate(&self, rate_hz: f64) {
        self.state.lock().max_scan_rate = rate_hz;
    }

    /// Queue one scan (raw words in registration order) for a layer.
    pub fn queue_scan(&self, devn: u32, words: &[u32]) {
        self.state
            .lock()
            .scripted
            .entry(devn)
            .or_default()
            .push_back(words.to_vec());
    }

    /// Queue several scans for a layer.
    pub fn queue_scans<I>(&self, devn: u32, scans: I)
    where
        I: IntoIterator<Item = Vec<u32>>,
    {
        let mut state = self.state.lock();
        let queue = state.scripted.entry(devn).or_default();
        queue.extend(scans);
    }

    /// Number of scans still queued for a layer.
    pub fn queued_scans(&self, devn: u32) -> usize {
        self.state
            .lock()
            .scripted
            .get(&devn)
            .map_or(0, VecDeque::len)
    }

    /// Make `read_input_map` hand out a null map for a layer.
    pub fn set_null_input_map(&self, devn: u32, null: bool) {
        let mut state = self.state.lock();
        if null {
            state.null_maps.insert(devn);
        } else {
            state.null_maps.remove(&devn);
        }
    }

    /// Fail the next `times` calls of `op` with `status`.
    pub fn inject(&self, op: MockOp, status: DriverStatus, times: u32) {
        self.push_failure(FailureScenario::Next { op, status, times });
    }

    /// Add an arbitrary failure scenario.
    pub fn push_failure(&self, scenario: FailureScenario) {
        self.state.lock().failures.push(scenario);
    }

    /// Remove every failure scenario.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Calls of one operation.
    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Handles of sessions that are currently open.
    pub fn open_sessions(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.state.lock().sessions.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Whether a session is open and started.
    pub fn is_running(&self, session: SessionHandle) -> bool {
        self.state
            .lock()
            .sessions
            .get(&session)
            .is_some_and(|s| s.running)
    }

    /// Channel registrations of a session, in call order.
    pub fn registered_channels(&self, session: SessionHandle) -> Vec<RegisteredChannels> {
        self.state
            .lock()
            .sessions
            .get(&session)
            .map(|s| s.channels.clone())
            .unwrap_or_default()
    }

    /// Protocol and effective rate of a session.
    pub fn session_info(&self, session: SessionHandle) -> Option<(MapType, f64)> {
        self.state
            .lock()
            .sessions
            .get(&session)
            .map(|s| (s.map_type, s.rate_hz))
    }
}

impl IomDriver for MockIom {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&mut self, map_type: MapType) -> DriverResult<SessionHandle> {
        let mut state = self.state.lock();
        state.failures.check(MockOp::OpenSession)?;
        let session = state.next_session;
        state.next_session += 1;
        state.sessions.insert(
            session,
            MockSession {
                map_type,
                rate_hz: 0.0,
                channels: Vec::new(),
                requested: HashMap::new(),
                running: false,
                input_maps: HashMap::new(),
            },
        );
        state.record(MockOp::OpenSession, session, None, &[]);
        debug!(iom = %self.name, session, %map_type, "mock session opened");
        Ok(session)
    }

    fn close_session(&mut self, session: SessionHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::CloseSession, session, None, &[]);
        // The handle is released even when the close is reported as failed.
        let removed = state.sessions.remove(&session);
        state.failures.check(MockOp::CloseSession)?;
        removed.map(|_| ()).ok_or(DriverStatus::NoSession(session))
    }

    fn set_scan_rate(&mut self, session: SessionHandle, rate_hz: f64) -> DriverResult<f64> {
        let mut state = self.state.lock();
        state.record(MockOp::SetScanRate, session, None, &[]);
        state.failures.check(MockOp::SetScanRate)?;
        if rate_hz.is_nan() || rate_hz <= 0.0 {
            return Err(DriverStatus::BadParameter);
        }
        let actual = rate_hz.min(state.max_scan_rate);
        state.session_mut(session)?.rate_hz = actual;
        Ok(actual)
    }

    fn add_channels(
        &mut self,
        session: SessionHandle,
        devn: u32,
        direction: Direction,
        words: &[u32],
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::AddChannels, session, Some(devn), words);
        state.failures.check(MockOp::AddChannels)?;
        if let Some(installed) = &state.installed {
            if !installed.contains(&devn) {
                return Err(DriverStatus::NoDevice(devn));
            }
        }
        if words.is_empty() {
            return Err(DriverStatus::BadParameter);
        }
        let s = state.session_mut(session)?;
        if s.running {
            return Err(DriverStatus::Busy);
        }
        s.channels.push(RegisteredChannels {
            devn,
            direction,
            words: words.to_vec(),
        });
        Ok(())
    }

    fn request_input_size(
        &mut self,
        session: SessionHandle,
        devn: u32,
        scans: usize,
    ) -> DriverResult<usize> {
        let mut state = self.state.lock();
        state.record(MockOp::RequestInputSize, session, Some(devn), &[]);
        state.failures.check(MockOp::RequestInputSize)?;
        let s = state.session_mut(session)?;
        if s.map_type != MapType::RtVMap {
            return Err(DriverStatus::BadParameter);
        }
        if s.input_words(devn).next().is_none() {
            return Err(DriverStatus::NoDevice(devn));
        }
        s.requested.insert(devn, scans);
        Ok(scans)
    }

    fn start(&mut self, session: SessionHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::Start, session, None, &[]);
        state.failures.check(MockOp::Start)?;
        let s = state.session_mut(session)?;
        if s.channels.is_empty() {
            return Err(DriverStatus::BadParameter);
        }
        s.running = true;
        Ok(())
    }

    fn stop(&mut self, session: SessionHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::Stop, session, None, &[]);
        state.failures.check(MockOp::Stop)?;
        state.session_mut(session)?.running = false;
        Ok(())
    }

    fn refresh(&mut self, session: SessionHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::Refresh, session, None, &[]);
        state.failures.check(MockOp::Refresh)?;

        let (map_type, devns, layouts, requested) = {
            let s = state.session_mut(session)?;
            if !s.running {
                return Err(DriverStatus::NoSession(session));
            }
            let devns = s.input_devns();
            let layouts: Vec<Vec<u32>> = devns
                .iter()
                .map(|&d| s.input_words(d).copied().collect())
                .collect();
            let requested: Vec<usize> = devns
                .iter()
                .map(|d| s.requested.get(d).copied().unwrap_or(1))
                .collect();
            (s.map_type, devns, layouts, requested)
        };

        let mut produced = Vec::with_capacity(devns.len());
        for ((&devn, words), &wanted) in devns.iter().zip(&layouts).zip(&requested) {
            let scans = match map_type {
                MapType::RtDMap => 1,
                MapType::RtVMap => wanted,
            };
            let mut bytes = Vec::new();
            let mut delivered = 0;
            for _ in 0..scans {
                match state.next_scan(devn, words) {
                    Some(scan) => {
                        for word in scan {
                            bytes.extend_from_slice(&word.to_le_bytes());
                        }
                        delivered += 1;
                    }
                    None => break,
                }
            }
            trace!(session, devn, delivered, "mock refresh");
            produced.push((devn, delivered, words.len(), bytes));
        }

        let s = state.session_mut(session)?;
        for (devn, delivered, width, bytes) in produced {
            // A fixed-rate map keeps its last contents until a new scan arrives.
            if map_type == MapType::RtVMap || delivered > 0 {
                s.input_maps.insert(devn, bytes);
            } else {
                s.input_maps
                    .entry(devn)
                    .or_insert_with(|| vec![0u8; width * RAW_WORD_SIZE]);
            }
        }
        Ok(())
    }

    fn read_input_map(
        &self,
        session: SessionHandle,
        devn: u32,
        dst: &mut Vec<u8>,
    ) -> Option<()> {
        let state = self.state.lock();
        if state.null_maps.contains(&devn) {
            return None;
        }
        let map = state.sessions.get(&session)?.input_maps.get(&devn)?;
        dst.clear();
        dst.extend_from_slice(map);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ueidaq_core::driver::{pack_channel, TIMESTAMP_CHANNEL};

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_scripted_dmap_keeps_last_scan() {
        let mut iom = MockIom::new("IOM_0");
        let s = iom.open_session(MapType::RtDMap).unwrap();
        iom.add_channels(
            s,
            0,
            Direction::Input,
            &[TIMESTAMP_CHANNEL, pack_channel(0, 0, 0)],
        )
        .unwrap();
        iom.start(s).unwrap();
        iom.queue_scan(0, &[100, 0x0080_0000]);

        let mut buf = Vec::new();
        iom.refresh(s).unwrap();
        iom.read_input_map(s, 0, &mut buf).unwrap();
        assert_eq!(words(&buf), vec![100, 0x0080_0000]);

        iom.refresh(s).unwrap();
        iom.read_input_map(s, 0, &mut buf).unwrap();
        assert_eq!(words(&buf), vec![100, 0x0080_0000]);
    }

    #[test]
    fn test_vmap_delivers_up_to_requested() {
        let mut iom = MockIom::new("IOM_0");
        let s = iom.open_session(MapType::RtVMap).unwrap();
        iom.add_channels(s, 1, Direction::Input, &[TIMESTAMP_CHANNEL, 0])
            .unwrap();
        assert_eq!(iom.request_input_size(s, 1, 2).unwrap(), 2);
        iom.start(s).unwrap();
        iom.queue_scans(1, vec![vec![1, 10], vec![2, 20], vec![3, 30]]);

        let mut buf = Vec::new();
        iom.refresh(s).unwrap();
        iom.read_input_map(s, 1, &mut buf).unwrap();
        assert_eq!(words(&buf), vec![1, 10, 2, 20]);

        iom.refresh(s).unwrap();
        iom.read_input_map(s, 1, &mut buf).unwrap();
        assert_eq!(words(&buf), vec![3, 30]);

        iom.refresh(s).unwrap();
        iom.read_input_map(s, 1, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_free_running_advances_timestamp() {
        let mut iom = MockIom::free_running("IOM_0", 5);
        let s = iom.open_session(MapType::RtDMap).unwrap();
        iom.add_channels(s, 0, Direction::Input, &[TIMESTAMP_CHANNEL, 0])
            .unwrap();
        iom.start(s).unwrap();

        let mut buf = Vec::new();
        iom.refresh(s).unwrap();
        iom.read_input_map(s, 0, &mut buf).unwrap();
        let first = words(&buf)[0];
        iom.refresh(s).unwrap();
        iom.read_input_map(s, 0, &mut buf).unwrap();
        assert_eq!(words(&buf)[0], first + 5);
    }

    #[test]
    fn test_injected_failure_and_call_log() {
        let mut iom = MockIom::new("IOM_0");
        iom.inject(MockOp::OpenSession, DriverStatus::Busy, 1);
        assert_eq!(iom.open_session(MapType::RtDMap), Err(DriverStatus::Busy));
        let s = iom.open_session(MapType::RtDMap).unwrap();
        assert_eq!(iom.open_sessions(), vec![s]);
        iom.close_session(s).unwrap();
        assert!(iom.open_sessions().is_empty());
        assert_eq!(iom.calls_of(MockOp::CloseSession).len(), 1);
    }

    #[test]
    fn test_uninstalled_slot_rejected() {
        let mut iom = MockIom::new("IOM_0");
        iom.set_installed_slots(&[0, 1]);
        let s = iom.open_session(MapType::RtDMap).unwrap();
        assert_eq!(
            iom.add_channels(s, 4, Direction::Input, &[0]),
            Err(DriverStatus::NoDevice(4))
        );
    }

    #[test]
    fn test_null_input_map() {
        let mut iom = MockIom::new("IOM_0");
        let s = iom.open_session(MapType::RtDMap).unwrap();
        iom.add_channels(s, 0, Direction::Input, &[TIMESTAMP_CHANNEL])
            .unwrap();
        iom.start(s).unwrap();
        iom.refresh(s).unwrap();
        iom.set_null_input_map(0, true);
        let mut buf = Vec::new();
        assert!(iom.read_input_map(s, 0, &mut buf).is_none());
    }
}
