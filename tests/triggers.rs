use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use animus::{
    AssetLists, AssetStore, Character, CharacterConfig, ContentStore, ConversationScript,
    EngineError, GateDecision, InteractionScript, RawEvent, SpeechPipeline, TriggerData,
    normalize,
};

#[derive(Default)]
struct QuietSpeech;

#[async_trait]
impl SpeechPipeline for QuietSpeech {
    async fn capture_audio(&self) -> anyhow::Result<Vec<u8>> {
        Ok(vec![0; 4])
    }
    async fn transcribe(&self, _audio: &[u8]) -> anyhow::Result<String> {
        Ok("".into())
    }
    async fn speak(&self, _text: &str, _volume: u8) -> anyhow::Result<()> {
        Ok(())
    }
    async fn cancel_speech(&self) {}
}

struct StaticAssets;

#[async_trait]
impl AssetStore for StaticAssets {
    async fn refresh_asset_lists(&self) -> anyhow::Result<AssetLists> {
        Ok(AssetLists {
            images: vec!["idle.png".into()],
            audio: vec!["chime.wav".into()],
        })
    }
}

struct FailingAssets;

#[async_trait]
impl AssetStore for FailingAssets {
    async fn refresh_asset_lists(&self) -> anyhow::Result<AssetLists> {
        Err(anyhow::anyhow!("storage offline"))
    }
}

struct ScriptStore(ConversationScript);

#[async_trait]
impl ContentStore for ScriptStore {
    async fn resolve(
        &self,
        conversation_id: Option<&str>,
    ) -> anyhow::Result<Option<ConversationScript>> {
        match conversation_id {
            None => Ok(Some(self.0.clone())),
            Some(id) if id == self.0.id => Ok(Some(self.0.clone())),
            Some(_) => Ok(None),
        }
    }
}

fn script() -> ConversationScript {
    ConversationScript {
        id: "c1".into(),
        default_interaction: "main".into(),
        interactions: vec![
            InteractionScript {
                id: "main".into(),
                greeting: None,
                on_intent: HashMap::from([("wave".to_string(), "waving".to_string())]),
            },
            InteractionScript {
                id: "waving".into(),
                greeting: None,
                on_intent: HashMap::new(),
            },
        ],
        farewell: None,
    }
}

fn character() -> Arc<Character> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Character::new(
        CharacterConfig::default(),
        Arc::new(QuietSpeech),
        Arc::new(StaticAssets),
        Arc::new(ScriptStore(script())),
    )
}

fn bump() -> RawEvent {
    RawEvent::Bump {
        sensor: "front_right".into(),
        pressed: true,
    }
}

#[tokio::test]
async fn paused_gate_drops_ordinary_triggers_and_admits_overrides() {
    let character = character();
    assert!(character.initialize().await);
    let bumps = Arc::new(Mutex::new(0u32));
    let responses = Arc::new(Mutex::new(Vec::new()));
    {
        let bumps = bumps.clone();
        character.channels().bumper.subscribe(move |_| *bumps.lock().unwrap() += 1);
        let responses = responses.clone();
        character
            .channels()
            .speech_intent
            .subscribe(move |n| responses.lock().unwrap().push(n.intent.clone()));
    }

    character.pause_trigger_handling(true).unwrap();
    assert!(character.waiting_for_override_trigger());

    let ordinary = normalize(bump()).unwrap();
    let decision = character.simulate_trigger(ordinary, false).await.unwrap();
    assert_eq!(decision, GateDecision::Drop);
    assert_eq!(*bumps.lock().unwrap(), 0);
    assert_eq!(character.dropped_trigger_count(), 1);

    let override_td = TriggerData::simulated_intent("all_stop", true);
    let decision = character.simulate_trigger(override_td, true).await.unwrap();
    assert_eq!(decision, GateDecision::Proceed);
    assert_eq!(responses.lock().unwrap().as_slice(), ["all_stop"]);
    assert_eq!(
        character.last_override_trigger().and_then(|t| t.intent),
        Some("all_stop".to_string())
    );
}

#[tokio::test]
async fn observe_only_raises_events_without_advancing_the_machine() {
    let character = character();
    assert!(character.initialize().await);
    character.start_conversation(Some("c1"), None).await.unwrap();
    let bumps = Arc::new(Mutex::new(0u32));
    {
        let bumps = bumps.clone();
        character.channels().bumper.subscribe(move |_| *bumps.lock().unwrap() += 1);
    }

    character.pause_trigger_handling(false).unwrap();

    let sensed = normalize(bump()).unwrap();
    let decision = character.simulate_trigger(sensed, false).await.unwrap();
    assert_eq!(decision, GateDecision::ObserveOnly);
    assert_eq!(*bumps.lock().unwrap(), 1);

    // an intent the script maps to another interaction must not advance it
    let intent = normalize(RawEvent::SpeechIntent {
        intent: "wave".into(),
        utterance: "wave please".into(),
        confidence: 0.8,
    })
    .unwrap();
    let decision = character.simulate_trigger(intent, false).await.unwrap();
    assert_eq!(decision, GateDecision::ObserveOnly);
    assert_eq!(character.current_interaction().unwrap().id, "main");

    character.restart_trigger_handling().unwrap();
    let intent = normalize(RawEvent::SpeechIntent {
        intent: "wave".into(),
        utterance: "wave please".into(),
        confidence: 0.8,
    })
    .unwrap();
    character.simulate_trigger(intent, false).await.unwrap();
    assert_eq!(character.current_interaction().unwrap().id, "waving");
}

#[tokio::test]
async fn restart_does_not_replay_triggers_dropped_while_paused() {
    let character = character();
    assert!(character.initialize().await);
    let bumps = Arc::new(Mutex::new(0u32));
    {
        let bumps = bumps.clone();
        character.channels().bumper.subscribe(move |_| *bumps.lock().unwrap() += 1);
    }

    character.pause_trigger_handling(true).unwrap();
    for _ in 0..3 {
        let decision = character
            .simulate_trigger(normalize(bump()).unwrap(), false)
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::Drop);
    }
    character.restart_trigger_handling().unwrap();
    assert!(!character.waiting_for_override_trigger());

    assert_eq!(*bumps.lock().unwrap(), 0, "dropped triggers must not replay");
    assert_eq!(character.dropped_trigger_count(), 3);

    character
        .simulate_trigger(normalize(bump()).unwrap(), false)
        .await
        .unwrap();
    assert_eq!(*bumps.lock().unwrap(), 1);
}

#[tokio::test]
async fn raw_events_flow_through_the_intake() {
    let character = character();
    assert!(character.initialize().await);
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        character
            .channels()
            .battery
            .subscribe(move |n| seen.lock().unwrap().push(n.charge_percent));
    }

    // a malformed reading is dropped without stalling later events
    character
        .push_event(RawEvent::Battery {
            charge_percent: 180.0,
            charging: false,
        })
        .unwrap();
    let sink = character.event_sink().unwrap();
    sink.send(RawEvent::Battery {
        charge_percent: 72.0,
        charging: true,
    })
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(seen.lock().unwrap().as_slice(), [72.0]);
}

#[tokio::test]
async fn initialize_failure_is_a_false_return_not_a_panic() {
    let character = Character::new(
        CharacterConfig::default(),
        Arc::new(QuietSpeech),
        Arc::new(FailingAssets),
        Arc::new(ScriptStore(script())),
    );
    assert!(!character.initialize().await);
    assert!(matches!(
        character.start_conversation(None, None).await,
        Err(EngineError::NotInitialized)
    ));
}

#[tokio::test]
async fn dispose_is_idempotent_and_fails_later_commands_fast() {
    let character = character();
    assert!(character.initialize().await);
    character.start_conversation(None, None).await.unwrap();
    let ended = Arc::new(Mutex::new(0u32));
    {
        let ended = ended.clone();
        character
            .channels()
            .conversation_ended
            .subscribe(move |_| *ended.lock().unwrap() += 1);
    }

    character.dispose().await;
    character.dispose().await;

    assert_eq!(*ended.lock().unwrap(), 1, "dispose forces exactly one stop");
    assert!(character.current_interaction().is_none());
    assert!(matches!(
        character.start_conversation(None, None).await,
        Err(EngineError::Disposed)
    ));
    assert!(matches!(character.change_volume(10), Err(EngineError::Disposed)));
    assert!(matches!(
        character.pause_trigger_handling(true),
        Err(EngineError::Disposed)
    ));
}

#[tokio::test]
async fn refresh_asset_lists_leaves_interaction_state_alone() {
    let character = character();
    assert!(character.initialize().await);
    character.start_conversation(None, None).await.unwrap();
    let before = character.current_interaction().unwrap();

    character.refresh_asset_lists().await.unwrap();

    assert_eq!(character.asset_lists().images, ["idle.png"]);
    assert_eq!(character.current_interaction().unwrap().instance, before.instance);
}
