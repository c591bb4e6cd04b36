//! Call-control activities.
//!
//! An activity is one logical call-control operation: it registers as an
//! event listener for its duration, sends the action(s) that start the
//! operation, and blocks the caller (bounded by a deadline) until a causally
//! related event sequence completes. The listener registration is held in a
//! [`ListenerGuard`], so it is removed on every exit path — success,
//! failure, timeout, or the caller dropping the future mid-await. A leaked
//! registration would make every later event on the connection pay dispatch
//! cost for a dead operation.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::action::ManagerAction;
use crate::channel::ChannelName;
use crate::connection::ManagerClient;
use crate::dispatcher::{EventListener, Interest, ListenerGuard, ListenerPriority};
use crate::error::{AmiError, AmiResult};
use crate::event::{EventName, ManagerEvent, DISCONNECT_EVENT};
use crate::headers::ManagerHeader;
use crate::protocol::{EventList, ManagerResponse};

/// Lifecycle of an activity. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Constructed, not yet started.
    Created,
    /// Listener registered, actions sent, awaiting the terminal event.
    Running,
    /// Reached its terminal event.
    Succeeded,
    /// Unrecoverable action failure or connection loss.
    Failed,
    /// The caller-supplied deadline elapsed first.
    TimedOut,
}

impl ActivityState {
    /// Whether this is a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityState::Succeeded | ActivityState::Failed | ActivityState::TimedOut
        )
    }
}

/// State machine shared by the concrete activities. The result state is set
/// exactly once; no transition leaves a terminal state.
#[derive(Debug)]
struct Activity {
    name: &'static str,
    state: Mutex<ActivityState>,
}

impl Activity {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(ActivityState::Created),
        }
    }

    fn state(&self) -> ActivityState {
        *self.state.lock()
    }

    fn start(&self) -> AmiResult<()> {
        let mut state = self.state.lock();
        match *state {
            ActivityState::Created => {
                *state = ActivityState::Running;
                Ok(())
            }
            other => Err(AmiError::activity_failed(
                self.name,
                format!("cannot start from {:?}", other),
            )),
        }
    }

    fn finish(&self, terminal: ActivityState) {
        debug_assert!(terminal.is_terminal());
        let mut state = self.state.lock();
        if *state == ActivityState::Running {
            debug!("activity {} -> {:?}", self.name, terminal);
            *state = terminal;
        }
    }
}

/// Listener forwarding matching events into an unbounded channel, consumed
/// by a waiting activity on its own task.
struct ChannelListener {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &ManagerEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Always include the synthetic `Disconnect` event, so a waiter with a
/// narrow interest set still observes connection death instead of running
/// out its full deadline.
fn with_disconnect(interest: Interest) -> Interest {
    match interest {
        Interest::All => Interest::All,
        Interest::Events(mut names) => {
            names.insert(DISCONNECT_EVENT.to_ascii_lowercase());
            Interest::Events(names)
        }
    }
}

/// Deadline-bounded event receiver backed by a guarded listener
/// registration.
pub(crate) struct EventWaiter {
    label: &'static str,
    rx: mpsc::UnboundedReceiver<ManagerEvent>,
    _guard: ListenerGuard,
}

impl EventWaiter {
    pub(crate) fn subscribe(
        client: &ManagerClient,
        label: &'static str,
        priority: ListenerPriority,
        interest: Interest,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = client.register_listener(
            Arc::new(ChannelListener { tx: tx.clone() }),
            priority,
            with_disconnect(interest),
        );
        // The connection may have died before the registration landed, in
        // which case the dispatcher's own Disconnect has already gone out.
        // Deliver it locally so the waiter cannot sit out its full
        // deadline on a dead connection.
        if !client.is_connected() {
            let _ = tx.send(ManagerEvent::new(DISCONNECT_EVENT));
        }
        Self {
            label,
            rx,
            _guard: guard,
        }
    }

    /// Wait for the next event satisfying `matches`, up to `budget`.
    pub(crate) async fn next_matching(
        &mut self,
        budget: Duration,
        matches: impl Fn(&ManagerEvent) -> bool,
    ) -> AmiResult<ManagerEvent> {
        let until = Instant::now() + budget;
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            match timeout(remaining, self.rx.recv()).await {
                Ok(Some(event)) if event.name() == DISCONNECT_EVENT => {
                    return Err(AmiError::ConnectionClosed);
                }
                Ok(Some(event)) if matches(&event) => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(AmiError::ConnectionClosed),
                Err(_) => {
                    return Err(AmiError::ActivityTimedOut {
                        name: self.label.to_string(),
                        timeout_ms: budget.as_millis() as u64,
                    })
                }
            }
        }
    }
}

/// Listener that reacts to nothing; holds a registration for activities
/// that complete on their action response alone.
struct NullListener;

impl EventListener for NullListener {
    fn on_event(&self, _event: &ManagerEvent) {}
}

/// Put a channel on hold.
///
/// Terminal on the success response to the `Hold` action, correlated by the
/// action's token.
#[derive(Debug)]
pub struct HoldActivity {
    activity: Activity,
    channel: ChannelName,
}

impl HoldActivity {
    /// Prepare a hold of the given channel.
    pub fn new(channel: impl Into<ChannelName>) -> Self {
        Self {
            activity: Activity::new("Hold"),
            channel: channel.into(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActivityState {
        self.activity.state()
    }

    /// Run to a terminal state within `deadline`.
    pub async fn run(
        &self,
        client: &ManagerClient,
        deadline: Duration,
    ) -> AmiResult<ManagerResponse> {
        self.activity.start()?;
        info!("holding {}", self.channel);

        // No events required for a hold; the registration still exists for
        // the duration of the operation.
        let _guard = client.register_listener(
            Arc::new(NullListener),
            ListenerPriority::Normal,
            Interest::events(Vec::<&str>::new()),
        );

        let action = ManagerAction::hold(self.channel.as_str());
        match timeout(deadline, client.send_action(action)).await {
            Ok(Ok(response)) => match response.into_result() {
                Ok(response) => {
                    self.activity.finish(ActivityState::Succeeded);
                    Ok(response)
                }
                Err(e) => {
                    self.activity.finish(ActivityState::Failed);
                    Err(AmiError::activity_failed("Hold", e.to_string()))
                }
            },
            Ok(Err(e)) => {
                self.activity.finish(ActivityState::Failed);
                Err(AmiError::activity_failed("Hold", e.to_string()))
            }
            Err(_) => {
                self.activity.finish(ActivityState::TimedOut);
                Err(AmiError::ActivityTimedOut {
                    name: "Hold".to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }
}

/// Park a channel and wait for the matching `ParkedCall` event, which
/// carries the assigned parking space.
#[derive(Debug)]
pub struct ParkActivity {
    activity: Activity,
    channel: ChannelName,
    park_timeout_ms: Option<u64>,
}

impl ParkActivity {
    /// Prepare a park of the given channel.
    pub fn new(channel: impl Into<ChannelName>) -> Self {
        Self {
            activity: Activity::new("Park"),
            channel: channel.into(),
            park_timeout_ms: None,
        }
    }

    /// Bound how long the call waits in the parking lot before ringing
    /// back.
    pub fn park_timeout(mut self, timeout_ms: u64) -> Self {
        self.park_timeout_ms = Some(timeout_ms);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActivityState {
        self.activity.state()
    }

    /// Run to a terminal state within `deadline`. Returns the `ParkedCall`
    /// event.
    pub async fn run(
        &self,
        client: &ManagerClient,
        deadline: Duration,
    ) -> AmiResult<ManagerEvent> {
        self.activity.start()?;
        info!("parking {}", self.channel);
        let started = Instant::now();

        let mut waiter = EventWaiter::subscribe(
            client,
            "Park",
            ListenerPriority::Normal,
            Interest::events([EventName::ParkedCall]),
        );

        let action = ManagerAction::park(self.channel.as_str(), self.park_timeout_ms);
        let result = async {
            client.send_action(action).await?.into_result()?;
            let remaining = deadline.saturating_sub(started.elapsed());
            waiter
                .next_matching(remaining, |event| {
                    event
                        .field(ManagerHeader::ParkeeChannel)
                        .map(ChannelName::new)
                        .or_else(|| event.channel())
                        .is_some_and(|parked| parked.is_same(&self.channel))
                })
                .await
        }
        .await;

        match result {
            Ok(event) => {
                self.activity.finish(ActivityState::Succeeded);
                Ok(event)
            }
            Err(AmiError::ActivityTimedOut { .. }) => {
                self.activity.finish(ActivityState::TimedOut);
                Err(AmiError::ActivityTimedOut {
                    name: "Park".to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
            Err(e) => {
                self.activity.finish(ActivityState::Failed);
                Err(AmiError::activity_failed("Park", e.to_string()))
            }
        }
    }
}

/// Enumerate the active bridges via the `BridgeList` list sequence.
#[derive(Debug)]
pub struct BridgeListActivity {
    activity: Activity,
}

impl BridgeListActivity {
    /// Prepare a bridge enumeration.
    pub fn new() -> Self {
        Self {
            activity: Activity::new("BridgeList"),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActivityState {
        self.activity.state()
    }

    /// Run to a terminal state within `deadline`. A declared-count mismatch
    /// is reported but the accumulated items are still returned.
    pub async fn run(&self, client: &ManagerClient, deadline: Duration) -> AmiResult<EventList> {
        self.activity.start()?;

        match timeout(deadline, client.send_list_action(ManagerAction::bridge_list(None))).await {
            Ok(Ok(list)) => {
                if let Some(mismatch) = list.count_mismatch() {
                    warn!("bridge list inconsistent: {}", mismatch);
                }
                self.activity.finish(ActivityState::Succeeded);
                Ok(list)
            }
            Ok(Err(e)) => {
                self.activity.finish(ActivityState::Failed);
                Err(AmiError::activity_failed("BridgeList", e.to_string()))
            }
            Err(_) => {
                self.activity.finish(ActivityState::TimedOut);
                Err(AmiError::ActivityTimedOut {
                    name: "BridgeList".to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }
}

impl Default for BridgeListActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// One channel participating in a multi-leg activity.
#[derive(Debug, Clone)]
pub struct CallLeg {
    /// Channel identity reported by the originate outcome.
    pub channel: ChannelName,
    /// `Uniqueid` of the channel, when the server reported one.
    pub unique_id: Option<String>,
    /// Set by the activity's hangup listener; never polled destructively.
    pub hangup_seen: bool,
}

/// Outcome of a successful [`DialActivity`].
#[derive(Debug, Clone)]
pub struct DialResult {
    /// Both legs in originate order: local handset first, remote second.
    pub legs: Vec<CallLeg>,
}

#[derive(Default)]
struct DialShared {
    legs: Mutex<Vec<CallLeg>>,
}

struct HangupWatcher {
    shared: Arc<DialShared>,
}

impl EventListener for HangupWatcher {
    fn on_event(&self, event: &ManagerEvent) {
        if !event.is(EventName::Hangup) {
            return;
        }
        let Some(channel) = event.channel() else {
            return;
        };
        let mut legs = self.shared.legs.lock();
        for leg in legs.iter_mut() {
            let by_id = match (event.unique_id(), leg.unique_id.as_deref()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if by_id || leg.channel.is_same(&channel) {
                debug!("hangup observed on {}", leg.channel);
                leg.hangup_seen = true;
            }
        }
    }
}

/// Dial two legs and tie their fates together: first the local handset,
/// then the remote party. If either leg fails to originate — or the
/// deadline expires — any leg that did come up is hung up before the
/// failure is reported. Partial success is never left in place.
#[derive(Debug)]
pub struct DialActivity {
    activity: Activity,
    local: String,
    remote: String,
    context: String,
    exten: String,
    priority: u32,
    caller_id: Option<String>,
    leg_timeout: Duration,
}

impl DialActivity {
    /// Prepare a two-leg dial through the given dialplan position.
    pub fn new(local: &str, remote: &str, context: &str, exten: &str, priority: u32) -> Self {
        Self {
            activity: Activity::new("Dial"),
            local: local.to_string(),
            remote: remote.to_string(),
            context: context.to_string(),
            exten: exten.to_string(),
            priority,
            caller_id: None,
            leg_timeout: Duration::from_secs(30),
        }
    }

    /// Caller ID presented to the remote party.
    pub fn caller_id(mut self, caller_id: &str) -> Self {
        self.caller_id = Some(caller_id.to_string());
        self
    }

    /// Budget for each leg's `OriginateResponse` (default 30 seconds).
    pub fn leg_timeout(mut self, leg_timeout: Duration) -> Self {
        self.leg_timeout = leg_timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActivityState {
        self.activity.state()
    }

    /// Run to a terminal state within `deadline`.
    pub async fn run(&self, client: &ManagerClient, deadline: Duration) -> AmiResult<DialResult> {
        self.activity.start()?;
        info!("dialing {} -> {}", self.local, self.remote);

        let shared = Arc::new(DialShared::default());
        let _guard = client.register_listener(
            Arc::new(HangupWatcher {
                shared: Arc::clone(&shared),
            }),
            ListenerPriority::Normal,
            Interest::events([EventName::Hangup]),
        );

        match timeout(deadline, self.dial_legs(client, &shared)).await {
            Ok(Ok(())) => {
                self.activity.finish(ActivityState::Succeeded);
                Ok(DialResult {
                    legs: shared.legs.lock().clone(),
                })
            }
            Ok(Err(e)) => {
                self.unwind(client, &shared).await;
                self.activity.finish(ActivityState::Failed);
                Err(AmiError::activity_failed("Dial", e.to_string()))
            }
            Err(_) => {
                self.unwind(client, &shared).await;
                self.activity.finish(ActivityState::TimedOut);
                Err(AmiError::ActivityTimedOut {
                    name: "Dial".to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    async fn dial_legs(&self, client: &ManagerClient, shared: &Arc<DialShared>) -> AmiResult<()> {
        self.originate_leg(client, shared, &self.local).await?;

        // The local handset must still be up before committing the second
        // leg.
        if shared.legs.lock().iter().any(|leg| leg.hangup_seen) {
            return Err(AmiError::ActionFailed {
                message: format!("{} hung up before the remote leg", self.local),
            });
        }

        self.originate_leg(client, shared, &self.remote).await
    }

    async fn originate_leg(
        &self,
        client: &ManagerClient,
        shared: &Arc<DialShared>,
        endpoint: &str,
    ) -> AmiResult<()> {
        let mut waiter = EventWaiter::subscribe(
            client,
            "Dial",
            ListenerPriority::Normal,
            Interest::events([EventName::OriginateResponse]),
        );

        let mut action =
            ManagerAction::originate(endpoint, &self.context, &self.exten, self.priority);
        if let Some(caller_id) = &self.caller_id {
            action.set_param("CallerID", caller_id);
        }
        let id = client.next_action_id();
        action.set_param(ManagerHeader::ActionId, id.clone());

        client.send_action(action).await?.into_result()?;

        let event = waiter
            .next_matching(self.leg_timeout, |event| {
                event.action_id() == Some(id.as_str())
            })
            .await?;

        let succeeded = event
            .field(ManagerHeader::Response)
            .is_some_and(|v| v.eq_ignore_ascii_case("success"));
        if !succeeded {
            return Err(AmiError::ActionFailed {
                message: format!(
                    "originate of {} failed: {}",
                    endpoint,
                    event.field(ManagerHeader::Reason).unwrap_or("unknown")
                ),
            });
        }

        let channel = event
            .channel()
            .unwrap_or_else(|| ChannelName::new(endpoint));
        debug!("leg up: {}", channel);
        shared.legs.lock().push(CallLeg {
            channel,
            unique_id: event.unique_id().map(String::from),
            hangup_seen: false,
        });
        Ok(())
    }

    /// Tear down every leg that came up and has not already hung up.
    async fn unwind(&self, client: &ManagerClient, shared: &Arc<DialShared>) {
        let legs: Vec<CallLeg> = shared.legs.lock().clone();
        for leg in legs {
            if leg.hangup_seen {
                continue;
            }
            info!("unwinding leg {}", leg.channel);
            if let Err(e) = client.hangup(leg.channel.as_str(), None).await {
                warn!("failed to hang up {}: {}", leg.channel, e);
            }
        }
    }
}

/// Wait for a hangup event on the given channel, bounded by `deadline`.
pub async fn wait_for_hangup(
    client: &ManagerClient,
    channel: &ChannelName,
    deadline: Duration,
) -> AmiResult<ManagerEvent> {
    let mut waiter = EventWaiter::subscribe(
        client,
        "WaitForHangup",
        ListenerPriority::Normal,
        Interest::events([EventName::Hangup]),
    );
    waiter
        .next_matching(deadline, |event| {
            event
                .channel()
                .is_some_and(|hung| hung.is_same(channel))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        let activity = Activity::new("Test");
        assert_eq!(activity.state(), ActivityState::Created);

        activity.start().unwrap();
        assert_eq!(activity.state(), ActivityState::Running);

        activity.finish(ActivityState::Succeeded);
        assert_eq!(activity.state(), ActivityState::Succeeded);

        // Terminal states are final.
        activity.finish(ActivityState::Failed);
        assert_eq!(activity.state(), ActivityState::Succeeded);
        assert!(activity.start().is_err());
    }

    #[test]
    fn cannot_start_twice() {
        let activity = Activity::new("Test");
        activity.start().unwrap();
        assert!(activity.start().is_err());
        assert_eq!(activity.state(), ActivityState::Running);
    }

    #[test]
    fn terminal_predicate() {
        assert!(!ActivityState::Created.is_terminal());
        assert!(!ActivityState::Running.is_terminal());
        assert!(ActivityState::Succeeded.is_terminal());
        assert!(ActivityState::Failed.is_terminal());
        assert!(ActivityState::TimedOut.is_terminal());
    }

    #[test]
    fn interest_gains_disconnect() {
        let interest = with_disconnect(Interest::events([EventName::Hangup]));
        assert!(interest.matches("Disconnect"));
        assert!(interest.matches("Hangup"));
        assert!(!interest.matches("Newchannel"));
    }

    #[test]
    fn hangup_watcher_matches_by_identity() {
        let shared = Arc::new(DialShared::default());
        shared.legs.lock().push(CallLeg {
            channel: ChannelName::new("SIP/100"),
            unique_id: None,
            hangup_seen: false,
        });
        let watcher = HangupWatcher {
            shared: Arc::clone(&shared),
        };

        // Suffixed instance of the same endpoint.
        let mut event = ManagerEvent::new("Hangup");
        event.set_field("Channel", "SIP/100-00000001");
        watcher.on_event(&event);
        assert!(shared.legs.lock()[0].hangup_seen);
    }

    #[test]
    fn hangup_watcher_prefers_unique_id() {
        let shared = Arc::new(DialShared::default());
        shared.legs.lock().push(CallLeg {
            channel: ChannelName::new("SIP/100-00000001"),
            unique_id: Some("111.1".to_string()),
            hangup_seen: false,
        });
        let watcher = HangupWatcher {
            shared: Arc::clone(&shared),
        };

        // Same endpoint, different instance and unique id: not our leg.
        let mut event = ManagerEvent::new("Hangup");
        event.set_field("Channel", "SIP/100-00000002");
        event.set_field("Uniqueid", "222.2");
        watcher.on_event(&event);
        assert!(!shared.legs.lock()[0].hangup_seen);

        event.set_field("Uniqueid", "111.1");
        watcher.on_event(&event);
        assert!(shared.legs.lock()[0].hangup_seen);
    }
}
