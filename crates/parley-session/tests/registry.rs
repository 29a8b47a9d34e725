//! Session registry tests — lifecycle, capacity, reaping and supervision.
//!
//! Run with: `cargo test -p parley-session --test registry`

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Behavior, MockAi, MockStt, MockTts, silence, speech, wait_for};
use parley_core::error::ParleyError;
use parley_core::types::{SessionStatus, TurnOutcome, TurnState};
use parley_media::{AudioBuffer, ChannelTransport, MediaTransport, RoomEdge};
use parley_session::{
    Collaborators, RegistrySettings, SessionCreated, SessionRegistry, SessionRequest, TurnEvent,
    TurnPolicy,
};

struct Fixture {
    registry: Arc<SessionRegistry>,
    transport: Arc<ChannelTransport>,
    tts: Arc<MockTts>,
}

fn settings() -> RegistrySettings {
    RegistrySettings {
        max_sessions: 4,
        inactivity_timeout: Duration::from_secs(300),
        reap_interval: Duration::from_secs(300),
        end_grace: Duration::from_millis(200),
        policy: TurnPolicy {
            vad_silence_frames: 3,
            playback_chunk_ms: 0,
            ..TurnPolicy::default()
        },
    }
}

fn fixture_with(ai: MockAi, tts: MockTts, settings: RegistrySettings) -> Fixture {
    let transport = Arc::new(ChannelTransport::new());
    let tts = Arc::new(tts);
    let collaborators = Collaborators::new(transport.clone())
        .with_stt(Arc::new(MockStt::saying("What's the weather?")))
        .with_tts(tts.clone())
        .with_ai(Arc::new(ai));
    Fixture {
        registry: Arc::new(SessionRegistry::new(settings, collaborators)),
        transport,
        tts,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        MockAi::replying("It's sunny."),
        MockTts::with_duration_ms(100),
        settings(),
    )
}

fn say(edge: &RoomEdge) {
    edge.inbound.send(speech()).unwrap();
    edge.inbound.send(silence(3)).unwrap();
}

async fn create(f: &Fixture) -> SessionCreated {
    f.registry.create(SessionRequest::default()).await.unwrap()
}

#[tokio::test]
async fn test_end_twice_then_not_found() {
    let f = fixture();
    let a = create(&f).await;
    let b = create(&f).await;
    assert_ne!(a.session_id, b.session_id);
    assert_eq!(f.registry.len().await, 2);
    assert_eq!(f.registry.status(&a.session_id).await, SessionStatus::Active);

    f.registry.end(&a.session_id).await.unwrap();
    assert_eq!(f.registry.len().await, 1);

    let err = f.registry.end(&a.session_id).await.unwrap_err();
    assert!(matches!(err, ParleyError::NotFound(_)));
    assert_eq!(f.registry.len().await, 1);

    assert_eq!(f.registry.status(&a.session_id).await, SessionStatus::Inactive);
    assert_eq!(f.registry.status(&b.session_id).await, SessionStatus::Active);
    assert_eq!(f.transport.room_count(), 1);
}

#[tokio::test]
async fn test_describe_new_session() {
    let f = fixture();
    let created = create(&f).await;
    assert_eq!(created.room.session_id, created.session_id);

    let info = f.registry.describe(&created.session_id).await.unwrap();
    assert_eq!(info.session_id, created.session_id);
    assert_eq!(info.room_id, created.room.room_id);
    assert_eq!(info.status, SessionStatus::Active);
    assert_eq!(info.state, TurnState::Idle);
    assert_eq!(info.turn, 0);
    assert_eq!(info.voice_id, "21m00Tcm4TlvDq8ikWAM");

    let listed = f.registry.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(f.registry.ids().await, vec![created.session_id]);
}

#[tokio::test]
async fn test_session_runs_turns_with_requested_voice() {
    let f = fixture();
    let created = f
        .registry
        .create(SessionRequest {
            voice_id: Some("Rachel".into()),
            language: Some("en-US".into()),
        })
        .await
        .unwrap();
    let mut edge = f.transport.attach(&created.room.room_id).unwrap();
    let mut events = f.registry.subscribe(&created.session_id).await.unwrap();

    say(&edge);
    let (event, _) = wait_for(&mut events, |e| matches!(e, TurnEvent::Finished(_))).await;
    let TurnEvent::Finished(summary) = event else {
        unreachable!()
    };
    assert_eq!(summary.outcome, TurnOutcome::Completed);
    assert_eq!(summary.reply.as_deref(), Some("It's sunny."));

    assert_eq!(*f.tts.voices.lock().unwrap(), vec!["Rachel".to_string()]);
    assert_eq!(edge.outbound.recv().await.unwrap().duration_ms(), 100);

    let info = f.registry.describe(&created.session_id).await.unwrap();
    assert_eq!(info.completed_turns, 1);
    assert_eq!(info.language.as_deref(), Some("en-US"));
}

#[tokio::test]
async fn test_capacity_bound() {
    let f = fixture_with(
        MockAi::replying("ok"),
        MockTts::with_duration_ms(50),
        RegistrySettings {
            max_sessions: 2,
            ..settings()
        },
    );
    let first = create(&f).await;
    create(&f).await;

    let err = f.registry.create(SessionRequest::default()).await.unwrap_err();
    assert!(matches!(err, ParleyError::CapacityExceeded { max: 2 }));
    assert_eq!(f.registry.len().await, 2);
    assert_eq!(f.transport.room_count(), 2);

    f.registry.end(&first.session_id).await.unwrap();
    assert!(f.registry.create(SessionRequest::default()).await.is_ok());
}

#[tokio::test]
async fn test_missing_collaborator_is_config_error() {
    let transport = Arc::new(ChannelTransport::new());
    let collaborators = Collaborators::new(transport.clone())
        .with_stt(Arc::new(MockStt::saying("hi")))
        .with_tts(Arc::new(MockTts::with_duration_ms(50)));
    let registry = SessionRegistry::new(settings(), collaborators);

    let err = registry.create(SessionRequest::default()).await.unwrap_err();
    assert!(matches!(err, ParleyError::Config(ref msg) if msg.contains("ai_backend")));
    assert_eq!(transport.room_count(), 0);
}

#[tokio::test]
async fn test_health_snapshot() {
    let f = fixture();
    create(&f).await;
    create(&f).await;

    let health = f.registry.health_snapshot().await;
    assert!(health.is_ready());
    assert_eq!(health.active_sessions, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_removes_only_idle_sessions() {
    let f = fixture();
    let stale = create(&f).await;
    let fresh = create(&f).await;

    tokio::time::advance(Duration::from_secs(200)).await;
    f.registry.touch(&fresh.session_id).await.unwrap();
    tokio::time::advance(Duration::from_secs(150)).await;

    let reaped = f.registry.reap_inactive().await;
    assert_eq!(reaped, vec![stale.session_id.clone()]);
    assert_eq!(f.registry.len().await, 1);
    assert_eq!(f.registry.status(&fresh.session_id).await, SessionStatus::Active);
    assert!(matches!(
        f.registry.end(&stale.session_id).await,
        Err(ParleyError::NotFound(_))
    ));

    // Nothing else is stale yet
    assert!(f.registry.reap_inactive().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_reaps_on_interval() {
    let f = fixture_with(
        MockAi::replying("ok"),
        MockTts::with_duration_ms(50),
        RegistrySettings {
            inactivity_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_secs(5),
            ..settings()
        },
    );
    create(&f).await;
    let supervisor = f.registry.spawn_supervisor().unwrap();

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(f.registry.len().await, 1);

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(f.registry.len().await, 0);
    assert_eq!(f.transport.room_count(), 0);

    f.registry.shutdown().await;
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_fault_limit_removes_session() {
    let f = fixture_with(
        MockAi::new(Behavior::Unavailable),
        MockTts::with_duration_ms(50),
        settings(),
    );
    let supervisor = f.registry.spawn_supervisor().unwrap();
    let created = create(&f).await;
    let edge = f.transport.attach(&created.room.room_id).unwrap();
    let mut events = f.registry.subscribe(&created.session_id).await.unwrap();

    for _ in 0..2 {
        say(&edge);
        wait_for(&mut events, |e| matches!(e, TurnEvent::Finished(_))).await;
    }
    say(&edge);
    wait_for(&mut events, |e| matches!(e, TurnEvent::Terminated { .. })).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !f.registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("terminated session was not removed");
    assert_eq!(f.transport.room_count(), 0);
    assert!(matches!(
        f.registry.end(&created.session_id).await,
        Err(ParleyError::NotFound(_))
    ));

    f.registry.shutdown().await;
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_no_audio_after_end() {
    let f = fixture_with(
        MockAi::replying("A very long story."),
        MockTts::with_duration_ms(2_000),
        RegistrySettings {
            policy: TurnPolicy {
                vad_silence_frames: 3,
                playback_chunk_ms: 100,
                ..TurnPolicy::default()
            },
            ..settings()
        },
    );
    let created = create(&f).await;
    let mut edge = f.transport.attach(&created.room.room_id).unwrap();
    let mut events = f.registry.subscribe(&created.session_id).await.unwrap();

    say(&edge);
    wait_for(&mut events, |e| {
        matches!(e, TurnEvent::StateChanged { to: TurnState::Speaking, .. })
    })
    .await;

    f.registry.end(&created.session_id).await.unwrap();

    // Whatever was queued drains, then the room is gone for good
    let mut delivered = 0;
    while let Some(_chunk) = tokio::time::timeout(Duration::from_secs(1), edge.outbound.recv())
        .await
        .expect("outbound audio did not close")
    {
        delivered += 1;
    }
    assert!(delivered < 20);

    let err = f
        .transport
        .send_audio(&created.room, AudioBuffer::new(vec![1; 160], 16_000))
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::Transport(_)));
}

#[tokio::test]
async fn test_concurrent_end_is_exactly_once() {
    let f = fixture_with(
        MockAi::replying("ok"),
        MockTts::with_duration_ms(50),
        RegistrySettings {
            max_sessions: 8,
            ..settings()
        },
    );
    for _ in 0..8 {
        create(&f).await;
    }

    let mut handles = Vec::new();
    for id in f.registry.ids().await {
        for _ in 0..2 {
            let registry = f.registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { registry.end(&id).await }));
        }
    }

    let mut ended = 0;
    let mut not_found = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ended += 1,
            Err(ParleyError::NotFound(_)) => not_found += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ended, 8);
    assert_eq!(not_found, 8);
    assert!(f.registry.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_drains_sessions() {
    let f = fixture();
    let supervisor = f.registry.spawn_supervisor().unwrap();
    for _ in 0..3 {
        create(&f).await;
    }

    f.registry.shutdown().await;
    assert!(f.registry.is_empty().await);
    assert_eq!(f.transport.room_count(), 0);
    supervisor.await.unwrap();
}
