use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use shared::constants::{
    PARTICIPANTS_COLLECTION, ROSTER_CHANNEL, ROUNDS_COLLECTION, WHEEL_CHANNEL, WINNERS_COLLECTION,
};
use shared::roster::{DemoteMode, Participant, ParticipantStatus};
use shared::shared_wheel_game::{
    ActionResponse, Actor, GameEvent, GameRound, GameState, SpinStarted, WheelGame, WheelMessage,
    WheelSettings, WheelSnapshot, WinnerRecord,
};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::broadcast::ResultBroadcaster;
use crate::error::Error;
use crate::store::{record_id, to_record, ChangeEvent, DataAccess, Filter, StoreError, SubscriptionId};

/// Current wall clock in unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn participant_key(round_id: u64, participant_id: &str) -> String {
    format!("{}:{}", round_id, participant_id)
}

fn participant_record(round_id: u64, participant: &Participant) -> Value {
    json!({
        "id": participant_key(round_id, &participant.id),
        "round_id": round_id,
        "participant_id": participant.id,
        "display_name": participant.display_name,
        "status": participant.status,
        "joined_at": participant.joined_at,
    })
}

fn round_record(round: &GameRound) -> Value {
    json!({
        "id": round.id.to_string(),
        "round_id": round.id,
        "state": round.state,
        "winner_id": round.winner_id,
        "participant_count": round.participants.len(),
        "created_at": round.created_at,
    })
}

/// Highest round id seen in `rounds` or `winners`, plus one.
async fn next_round_id(store: &dyn DataAccess) -> Result<u64, StoreError> {
    let mut last = 0;
    for collection in [ROUNDS_COLLECTION, WINNERS_COLLECTION] {
        for row in store.query(collection, Filter::all()).await? {
            if let Some(round_id) = row.get("round_id").and_then(Value::as_u64) {
                last = last.max(round_id);
            }
        }
    }
    Ok(last + 1)
}

/// Flags rounds left spinning by a previous process. Their winner was never drawn.
async fn mark_interrupted_rounds(store: &dyn DataAccess) -> Result<usize, StoreError> {
    let spinning = store
        .query(ROUNDS_COLLECTION, Filter::all().eq("state", GameState::Spinning.to_string()))
        .await?;
    for row in &spinning {
        let id = record_id(row)?;
        store
            .update(ROUNDS_COLLECTION, &id, json!({ "interrupted": true }))
            .await?;
    }
    Ok(spinning.len())
}

async fn save_round(store: &dyn DataAccess, round: &GameRound) -> Result<(), StoreError> {
    let record = round_record(round);
    match store
        .update(ROUNDS_COLLECTION, &round.id.to_string(), record.clone())
        .await
    {
        Err(StoreError::NotFound(_)) => store.insert(ROUNDS_COLLECTION, record).await.map(|_| ()),
        other => other,
    }
}

/// Owns the single live `WheelGame` and connects it to storage and viewers.
#[derive(Clone)]
pub struct WheelService {
    game: Arc<Mutex<WheelGame>>,
    /// Taken while `game` is still held and kept through the store writes,
    /// so writes land in mutation order. Never lock `game` while holding it.
    persist: Arc<Mutex<()>>,
    store: Arc<dyn DataAccess>,
    broadcaster: ResultBroadcaster,
    settings: WheelSettings,
    wakeup: Arc<Notify>,
    roster_subscription: SubscriptionId,
}

impl WheelService {
    /// Opens the wheel on the round after the last one the store knows about.
    pub async fn new(
        settings: WheelSettings,
        store: Arc<dyn DataAccess>,
        broadcaster: ResultBroadcaster,
        now: u64,
    ) -> Result<Self, StoreError> {
        let round_id = next_round_id(store.as_ref()).await?;
        let interrupted = mark_interrupted_rounds(store.as_ref()).await?;
        if interrupted > 0 {
            warn!("Marked {} unfinished rounds as interrupted", interrupted);
        }

        let game = WheelGame::starting_at_round(settings, round_id, now);
        save_round(store.as_ref(), game.round()).await?;
        info!("🎡 Wheel open at round {}", round_id);

        let relay = broadcaster.clone();
        let roster_subscription = store.subscribe(
            PARTICIPANTS_COLLECTION,
            Arc::new(move |change: &ChangeEvent| {
                relay.publish_json(ROSTER_CHANNEL, &json!({ "type": "roster_record", "data": change }));
            }),
        );

        Ok(Self {
            game: Arc::new(Mutex::new(game)),
            persist: Arc::new(Mutex::new(())),
            store,
            broadcaster,
            settings,
            wakeup: Arc::new(Notify::new()),
            roster_subscription,
        })
    }

    /// Stops forwarding store changes to viewers.
    pub fn shutdown(&self) {
        self.store.unsubscribe(self.roster_subscription);
    }

    pub fn broadcaster(&self) -> &ResultBroadcaster {
        &self.broadcaster
    }

    pub async fn snapshot(&self) -> WheelSnapshot {
        self.game.lock().await.snapshot()
    }

    pub async fn accepted_participants(&self) -> Vec<Participant> {
        self.game.lock().await.accepted_participants()
    }

    /// Winner history from the store, or the in-memory copy if the store can't answer.
    pub async fn history(&self) -> Vec<WinnerRecord> {
        match self.store.query(WINNERS_COLLECTION, Filter::all()).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| match serde_json::from_value(row) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Skipping unreadable winner record: {}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                error!("Failed to load winner history, using memory: {}", e);
                self.game.lock().await.history().to_vec()
            }
        }
    }

    pub async fn register(&self, actor: &Actor, display_name: &str) -> Result<ActionResponse, Error> {
        let (round_id, participant, snapshot, _writes) = {
            let mut game = self.game.lock().await;
            let participant = game.register(actor, display_name, now_ms())?;
            (game.round().id, participant, game.snapshot(), self.persist.lock().await)
        };
        info!("🎡 Round {}: {} joined the wheel", round_id, participant.display_name);
        self.publish_roster(&snapshot);

        let saved = self
            .store
            .insert(PARTICIPANTS_COLLECTION, participant_record(round_id, &participant))
            .await
            .map(|_| ());
        Ok(self.respond(snapshot, saved))
    }

    pub async fn cancel(&self, actor: &Actor, participant_id: Option<&str>) -> Result<ActionResponse, Error> {
        let target = participant_id.unwrap_or(&actor.user_id);
        let (round_id, removed, snapshot, _writes) = {
            let mut game = self.game.lock().await;
            let removed = game.cancel(actor, target)?;
            (game.round().id, removed, game.snapshot(), self.persist.lock().await)
        };
        info!("Round {}: {} left the wheel", round_id, removed.display_name);
        self.publish_roster(&snapshot);

        let saved = self
            .store
            .delete(PARTICIPANTS_COLLECTION, &participant_key(round_id, &removed.id))
            .await;
        Ok(self.respond(snapshot, saved))
    }

    pub async fn accept(&self, actor: &Actor, participant_id: &str) -> Result<ActionResponse, Error> {
        let (round_id, accepted, snapshot, _writes) = {
            let mut game = self.game.lock().await;
            let accepted = game.accept(actor, participant_id)?;
            (game.round().id, accepted, game.snapshot(), self.persist.lock().await)
        };
        self.publish_roster(&snapshot);

        let saved = self.save_status(round_id, &accepted).await;
        Ok(self.respond(snapshot, saved))
    }

    pub async fn accept_all(&self, actor: &Actor) -> Result<ActionResponse, Error> {
        let (round_id, changed, snapshot, _writes) = {
            let mut game = self.game.lock().await;
            let changed = game.accept_all(actor)?;
            (game.round().id, changed, game.snapshot(), self.persist.lock().await)
        };
        info!("Round {}: accepted {} waiting participants", round_id, changed);
        self.publish_roster(&snapshot);

        let mut saved = Ok(());
        for participant in &snapshot.participants {
            if let Err(e) = self.save_status(round_id, participant).await {
                saved = Err(e);
            }
        }
        Ok(self.respond(snapshot, saved))
    }

    pub async fn demote(&self, actor: &Actor, participant_id: &str, mode: DemoteMode) -> Result<ActionResponse, Error> {
        let (round_id, demoted, snapshot, _writes) = {
            let mut game = self.game.lock().await;
            let demoted = game.demote(actor, participant_id, mode)?;
            (game.round().id, demoted, game.snapshot(), self.persist.lock().await)
        };
        self.publish_roster(&snapshot);

        let saved = self.save_demotion(round_id, &demoted, mode).await;
        Ok(self.respond(snapshot, saved))
    }

    pub async fn demote_all(&self, actor: &Actor, mode: DemoteMode) -> Result<ActionResponse, Error> {
        let (round_id, demoted, snapshot, _writes) = {
            let mut game = self.game.lock().await;
            let demoted = game.demote_all(actor, mode)?;
            (game.round().id, demoted, game.snapshot(), self.persist.lock().await)
        };
        info!("Round {}: demoted {} participants ({:?})", round_id, demoted.len(), mode);
        self.publish_roster(&snapshot);

        let mut saved = Ok(());
        for participant in &demoted {
            if let Err(e) = self.save_demotion(round_id, participant, mode).await {
                saved = Err(e);
            }
        }
        Ok(self.respond(snapshot, saved))
    }

    /// Starts the spin and wakes the driver. The returned plan is what every viewer animates.
    pub async fn spin(&self, actor: &Actor) -> Result<SpinStarted, Error> {
        let (started, round, _writes) = {
            let mut game = self.game.lock().await;
            let started = game.start_spin(actor, now_ms(), &mut rand::thread_rng())?;
            (started, game.round().clone(), self.persist.lock().await)
        };
        info!(
            "🎡 WHEEL SPIN: round {} spinning with {} participants",
            started.round_id,
            started.participants.len()
        );
        self.broadcaster
            .publish_json(WHEEL_CHANNEL, &WheelMessage::Event(GameEvent::SpinStarted(started.clone())));
        self.wakeup.notify_one();

        if let Err(e) = save_round(self.store.as_ref(), &round).await {
            error!("Failed to persist round {}: {}", round.id, e);
        }
        Ok(started)
    }

    /// Advances the game to `now`, broadcasting and persisting whatever happened.
    pub async fn tick(&self, now: u64) -> Vec<GameEvent> {
        let mut game = self.game.lock().await;
        let before = game.round().clone();
        let events = game.advance(now);

        let ticks = events.iter().filter(|e| matches!(e, GameEvent::Tick { .. })).count();
        if ticks > 0 {
            debug!("Round {}: {} segment ticks", before.id, ticks);
        }
        if ticks == events.len() {
            return events;
        }

        // finish and reset can land in one advance; the finished round is
        // rebuilt from the pre-advance copy so it is still written
        let finished = events.iter().find_map(|event| match event {
            GameEvent::SpinCompleted(completed) => Some(GameRound {
                state: GameState::Finished,
                winner_id: Some(completed.winner.id.clone()),
                ..before.clone()
            }),
            _ => None,
        });
        let current = game.round().clone();
        let snapshot = game.snapshot();
        let _writes = self.persist.lock().await;
        drop(game);

        for event in &events {
            match event {
                GameEvent::Tick { .. } => continue,
                GameEvent::SpinCompleted(completed) => {
                    info!(
                        "🎡 WHEEL SPIN: round {} won by {} 🏆",
                        completed.round_id, completed.winner.display_name
                    );
                    self.broadcaster
                        .publish_json(WHEEL_CHANNEL, &WheelMessage::Event(event.clone()));
                    self.save_winner(&completed.record).await;
                    if let Some(round) = &finished {
                        if let Err(e) = save_round(self.store.as_ref(), round).await {
                            error!("Failed to persist round {}: {}", round.id, e);
                        }
                    }
                }
                GameEvent::RoundReset { round_id, .. } => {
                    info!("Wheel reset, round {} is open", round_id);
                    self.broadcaster
                        .publish_json(WHEEL_CHANNEL, &WheelMessage::Event(event.clone()));
                    self.broadcaster
                        .publish_json(WHEEL_CHANNEL, &WheelMessage::Snapshot(snapshot.clone()));
                    if let Err(e) = save_round(self.store.as_ref(), &current).await {
                        error!("Failed to persist round {}: {}", current.id, e);
                    }
                }
                GameEvent::SpinStarted(_) => {
                    self.broadcaster
                        .publish_json(WHEEL_CHANNEL, &WheelMessage::Event(event.clone()));
                }
            }
        }
        events
    }

    /// Runs forever: steps the game every frame while something is pending,
    /// and sleeps until the next spin otherwise.
    pub async fn run_driver(self) {
        let frame = Duration::from_millis(self.settings.frame_interval_ms.max(1));
        loop {
            let pending = self.game.lock().await.needs_advance();
            if pending {
                self.tick(now_ms()).await;
                tokio::time::sleep(frame).await;
            } else {
                self.wakeup.notified().await;
            }
        }
    }

    fn publish_roster(&self, snapshot: &WheelSnapshot) {
        self.broadcaster.publish_json(
            WHEEL_CHANNEL,
            &WheelMessage::RosterChanged {
                round_id: snapshot.round_id,
                participants: snapshot.participants.clone(),
            },
        );
    }

    fn respond(&self, snapshot: WheelSnapshot, saved: Result<(), StoreError>) -> ActionResponse {
        let message = match saved {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to persist roster change for round {}: {}", snapshot.round_id, e);
                Some(format!("Change applied but could not be saved: {}", e))
            }
        };
        ActionResponse {
            success: true,
            snapshot,
            message,
        }
    }

    async fn save_status(&self, round_id: u64, participant: &Participant) -> Result<(), StoreError> {
        let key = participant_key(round_id, &participant.id);
        match self
            .store
            .update(PARTICIPANTS_COLLECTION, &key, json!({ "status": participant.status }))
            .await
        {
            // mirror missed the insert; write the whole record
            Err(StoreError::NotFound(_)) => self
                .store
                .insert(PARTICIPANTS_COLLECTION, participant_record(round_id, participant))
                .await
                .map(|_| ()),
            other => other,
        }
    }

    async fn save_demotion(&self, round_id: u64, participant: &Participant, mode: DemoteMode) -> Result<(), StoreError> {
        match mode {
            DemoteMode::ToWaiting => {
                let waiting = Participant {
                    status: ParticipantStatus::Waiting,
                    ..participant.clone()
                };
                self.save_status(round_id, &waiting).await
            }
            DemoteMode::Remove => {
                self.store
                    .delete(PARTICIPANTS_COLLECTION, &participant_key(round_id, &participant.id))
                    .await
            }
        }
    }

    async fn save_winner(&self, record: &WinnerRecord) {
        let saved = match to_record(record) {
            Ok(mut value) => {
                if let Value::Object(map) = &mut value {
                    map.insert("id".to_string(), Value::String(record.round_id.to_string()));
                }
                self.store.insert(WINNERS_COLLECTION, value).await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            error!("Failed to persist winner of round {}: {}", record.round_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeHandler, MemoryStore, StoreFuture};
    use futures::FutureExt;
    use shared::WheelError;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn service_with(store: Arc<dyn DataAccess>) -> WheelService {
        WheelService::new(WheelSettings::default(), store, ResultBroadcaster::new(64), now_ms())
            .await
            .unwrap()
    }

    async fn seeded(store: Arc<dyn DataAccess>, names: &[&str]) -> WheelService {
        let service = service_with(store).await;
        for name in names {
            service.register(&Actor::user(name.to_lowercase()), name).await.unwrap();
        }
        service.accept_all(&Actor::admin("admin")).await.unwrap();
        service
    }

    fn down() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }

    /// Empty and accepting until `down` is set, then fails every call.
    #[derive(Default)]
    struct FailingStore {
        down: AtomicBool,
    }

    impl DataAccess for FailingStore {
        fn insert<'a>(&'a self, _collection: &'a str, record: Value) -> StoreFuture<'a, Value> {
            let failed = self.down.load(Ordering::SeqCst);
            async move { if failed { Err(down()) } else { Ok(record) } }.boxed()
        }

        fn update<'a>(&'a self, _collection: &'a str, _id: &'a str, _patch: Value) -> StoreFuture<'a, ()> {
            let failed = self.down.load(Ordering::SeqCst);
            async move { if failed { Err(down()) } else { Ok(()) } }.boxed()
        }

        fn delete<'a>(&'a self, _collection: &'a str, _id: &'a str) -> StoreFuture<'a, ()> {
            let failed = self.down.load(Ordering::SeqCst);
            async move { if failed { Err(down()) } else { Ok(()) } }.boxed()
        }

        fn query<'a>(&'a self, _collection: &'a str, _filter: Filter) -> StoreFuture<'a, Vec<Value>> {
            let failed = self.down.load(Ordering::SeqCst);
            async move { if failed { Err(down()) } else { Ok(Vec::new()) } }.boxed()
        }

        fn subscribe(&self, _collection: &str, _on_change: ChangeHandler) -> SubscriptionId {
            0
        }

        fn unsubscribe(&self, _id: SubscriptionId) {}
    }

    /// Memory store whose next update stalls once `stall_next_update` is set.
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryStore,
        stall_next_update: AtomicBool,
    }

    impl DataAccess for SlowStore {
        fn insert<'a>(&'a self, collection: &'a str, record: Value) -> StoreFuture<'a, Value> {
            self.inner.insert(collection, record)
        }

        fn update<'a>(&'a self, collection: &'a str, id: &'a str, patch: Value) -> StoreFuture<'a, ()> {
            let stall = self.stall_next_update.swap(false, Ordering::SeqCst);
            async move {
                if stall {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                self.inner.update(collection, id, patch).await
            }
            .boxed()
        }

        fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, ()> {
            self.inner.delete(collection, id)
        }

        fn query<'a>(&'a self, collection: &'a str, filter: Filter) -> StoreFuture<'a, Vec<Value>> {
            self.inner.query(collection, filter)
        }

        fn subscribe(&self, collection: &str, on_change: ChangeHandler) -> SubscriptionId {
            self.inner.subscribe(collection, on_change)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.inner.unsubscribe(id)
        }
    }

    fn round_ids(rows: &[Value]) -> Vec<u64> {
        rows.iter().filter_map(|row| row["round_id"].as_u64()).collect()
    }

    #[tokio::test]
    async fn test_register_mirrors_roster_in_store() {
        let store = Arc::new(MemoryStore::new());
        let service = seeded(store.clone(), &["Alice", "Bob"]).await;

        let rows = store.query(PARTICIPANTS_COLLECTION, Filter::all()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "1:alice");
        assert_eq!(rows[0]["status"], "accepted");

        service.demote(&Actor::admin("admin"), "bob", DemoteMode::Remove).await.unwrap();
        let rows = store.query(PARTICIPANTS_COLLECTION, Filter::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_full_round_persists_winner_and_resets() {
        let store = Arc::new(MemoryStore::new());
        let service = seeded(store.clone(), &["Alice", "Bob", "Carol"]).await;
        let mut viewer = service.broadcaster().on_message(&[WHEEL_CHANNEL]);

        let started = service.spin(&Actor::admin("admin")).await.unwrap();
        assert_eq!(started.participants.len(), 3);
        assert_eq!(service.snapshot().await.state, GameState::Spinning);

        let done_at = started.plan.ends_at();
        let events = service.tick(done_at).await;
        let completed = events
            .iter()
            .find_map(|e| match e {
                GameEvent::SpinCompleted(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();

        let history = service.history().await;
        assert_eq!(history, vec![completed.record.clone()]);
        let rounds = store.query(ROUNDS_COLLECTION, Filter::all()).await.unwrap();
        assert_eq!(rounds[0]["state"], "finished");
        assert_eq!(rounds[0]["winner_id"], completed.winner.id.as_str());

        let events = service.tick(completed.reset_at).await;
        assert!(matches!(events.as_slice(), [GameEvent::RoundReset { round_id: 2, .. }]));
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.state, GameState::Idle);
        assert!(snapshot.participants.is_empty());
        let rounds = store.query(ROUNDS_COLLECTION, Filter::all()).await.unwrap();
        assert_eq!(round_ids(&rounds), vec![1, 2]);
        assert_eq!(rounds[1]["state"], "idle");

        let mut kinds = Vec::new();
        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_millis(50), viewer.recv()).await
        {
            let value: Value = serde_json::from_str(&message.payload).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert!(kinds.contains(&"event".to_string()));
        assert_eq!(kinds.last().map(String::as_str), Some("snapshot"));
    }

    #[tokio::test]
    async fn test_late_tick_records_finished_round_and_opens_next() {
        let store = Arc::new(MemoryStore::new());
        let service = seeded(store.clone(), &["Alice", "Bob"]).await;
        let started = service.spin(&Actor::admin("admin")).await.unwrap();

        // one tick well past both the spin end and the reset deadline
        let events = service.tick(started.plan.ends_at() + 60_000).await;
        let completed = events
            .iter()
            .find_map(|e| match e {
                GameEvent::SpinCompleted(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(events.last(), Some(GameEvent::RoundReset { round_id: 2, .. })));

        let finished = store
            .query(ROUNDS_COLLECTION, Filter::all().eq("round_id", 1))
            .await
            .unwrap();
        assert_eq!(finished[0]["state"], "finished");
        assert_eq!(finished[0]["winner_id"], completed.winner.id.as_str());
        assert_eq!(finished[0]["participant_count"], 2);

        let opened = store
            .query(ROUNDS_COLLECTION, Filter::all().eq("round_id", 2))
            .await
            .unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0]["state"], "idle");
        assert_eq!(opened[0]["winner_id"], Value::Null);
    }

    #[tokio::test]
    async fn test_round_ids_continue_across_restarts() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..2 {
            let service = seeded(store.clone(), &["Alice"]).await;
            let started = service.spin(&Actor::admin("admin")).await.unwrap();
            service.tick(started.plan.ends_at()).await;
            service.shutdown();
        }

        let winners = store.query(WINNERS_COLLECTION, Filter::all()).await.unwrap();
        assert_eq!(round_ids(&winners), vec![1, 2]);
        let participants = store.query(PARTICIPANTS_COLLECTION, Filter::all()).await.unwrap();
        let keys: Vec<&str> = participants.iter().filter_map(|row| row["id"].as_str()).collect();
        assert_eq!(keys, vec!["1:alice", "2:alice"]);

        let third = service_with(store.clone()).await;
        assert_eq!(third.snapshot().await.round_id, 3);
        assert_eq!(third.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_restart_marks_unfinished_spin_interrupted() {
        let store = Arc::new(MemoryStore::new());
        let crashed = seeded(store.clone(), &["Alice"]).await;
        crashed.spin(&Actor::admin("admin")).await.unwrap();
        crashed.shutdown();

        let service = service_with(store.clone()).await;
        assert_eq!(service.snapshot().await.round_id, 2);
        let rounds = store
            .query(ROUNDS_COLLECTION, Filter::all().eq("interrupted", true))
            .await
            .unwrap();
        assert_eq!(round_ids(&rounds), vec![1]);
        assert_eq!(rounds[0]["state"], "spinning");
    }

    #[tokio::test]
    async fn test_store_writes_follow_mutation_order() {
        let store = Arc::new(SlowStore::default());
        let service = service_with(store.clone()).await;
        let admin = Actor::admin("admin");
        service.register(&Actor::user("alice"), "Alice").await.unwrap();
        store.stall_next_update.store(true, Ordering::SeqCst);

        let (accepted, demoted) = tokio::join!(service.accept(&admin, "alice"), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            service.demote(&admin, "alice", DemoteMode::ToWaiting).await
        });
        accepted.unwrap();
        demoted.unwrap();

        let rows = store
            .query(PARTICIPANTS_COLLECTION, Filter::all().eq("participant_id", "alice"))
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "waiting");
        assert_eq!(
            service.snapshot().await.participants[0].status,
            ParticipantStatus::Waiting
        );
    }

    #[tokio::test]
    async fn test_unreadable_store_at_boot_is_an_error() {
        let store = Arc::new(FailingStore::default());
        store.down.store(true, Ordering::SeqCst);
        let opened = WheelService::new(
            WheelSettings::default(),
            store,
            ResultBroadcaster::new(8),
            now_ms(),
        )
        .await;
        assert!(matches!(opened, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_not_rolled_back() {
        let store = Arc::new(FailingStore::default());
        let service = service_with(store.clone()).await;
        store.down.store(true, Ordering::SeqCst);

        let response = service.register(&Actor::user("alice"), "Alice").await.unwrap();
        assert!(response.success);
        assert!(response.message.is_some());
        assert_eq!(response.snapshot.participants.len(), 1);

        service.accept_all(&Actor::admin("admin")).await.unwrap();
        let started = service.spin(&Actor::admin("admin")).await.unwrap();
        service.tick(started.plan.ends_at()).await;

        // store is down; history comes from memory
        assert_eq!(service.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_guards_surface_as_wheel_errors() {
        let service = service_with(Arc::new(MemoryStore::new())).await;
        assert!(matches!(
            service.spin(&Actor::admin("admin")).await,
            Err(Error::Wheel(WheelError::EmptyPool))
        ));
        service.register(&Actor::user("alice"), "Alice").await.unwrap();
        assert!(matches!(
            service.register(&Actor::user("alice"), "Alice again").await,
            Err(Error::Wheel(WheelError::AlreadyRegistered(_)))
        ));
        assert!(matches!(
            service.accept(&Actor::user("alice"), "alice").await,
            Err(Error::Wheel(WheelError::Forbidden(_)))
        ));
        assert!(matches!(
            service.demote(&Actor::admin("admin"), "alice", DemoteMode::ToWaiting).await,
            Err(Error::Wheel(WheelError::InvalidState { .. }))
        ));
        assert!(matches!(
            service.cancel(&Actor::user("bob"), Some("alice")).await,
            Err(Error::Wheel(WheelError::Forbidden(_)))
        ));
        service.cancel(&Actor::user("alice"), None).await.unwrap();
        assert!(service.snapshot().await.participants.is_empty());
    }

    #[tokio::test]
    async fn test_store_changes_reach_roster_channel() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store).await;
        let mut roster = service.broadcaster().on_message(&[ROSTER_CHANNEL]);

        service.register(&Actor::user("alice"), "Alice").await.unwrap();
        let message = roster.recv().await.unwrap();
        let value: Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(value["type"], "roster_record");
        assert_eq!(value["data"]["kind"], "insert");
        assert_eq!(value["data"]["id"], "1:alice");
    }

    #[tokio::test]
    async fn test_driver_finishes_spin_on_its_own() {
        let settings = WheelSettings {
            spin_duration_ms: 200,
            reset_delay_ms: 100_000,
            frame_interval_ms: 10,
            ..WheelSettings::default()
        };
        let service = WheelService::new(
            settings,
            Arc::new(MemoryStore::new()),
            ResultBroadcaster::new(64),
            now_ms(),
        )
        .await
        .unwrap();
        service.register(&Actor::user("alice"), "Alice").await.unwrap();
        service.accept(&Actor::admin("admin"), "alice").await.unwrap();

        let driver = tokio::spawn(service.clone().run_driver());
        service.spin(&Actor::admin("admin")).await.unwrap();

        let mut finished = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if service.snapshot().await.state == GameState::Finished {
                finished = true;
                break;
            }
        }
        driver.abort();
        assert!(finished);
        assert_eq!(service.history().await.len(), 1);
    }
}
