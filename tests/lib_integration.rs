//! Integration tests exercising the ltm-engine library API from an external crate.

use std::sync::Arc;
use std::time::Duration;

use ltm_engine::stream::context::MEMORY_NOTE_HEADER;
use ltm_engine::stream::GENERATION_ERROR_CHUNK;
use ltm_engine::testing::{EngineEvent, KeywordEmbedder, MockEngine, MockReply};
use ltm_engine::{
    Config, LtmService, MemoryStore, OllamaEngine, Persona, PromptPayload, RetrievalSettings,
    RetrieveOptions, SessionSettings, SessionState, StreamError, StreamEvent, StreamSettings,
    AUTO_MEMORY_TAG, GLOBAL_PERSONA,
};
use tempfile::TempDir;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    service: LtmService,
    engine: MockEngine,
    _dir: TempDir,
}

fn harness_with(embedder: KeywordEmbedder) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = Config {
        database_path: dir.path().join("memory.db"),
        model_cache: dir.path().join("models"),
        settle_delay_ms: 5,
        ..Config::default()
    };
    let engine = MockEngine::new();
    let service =
        LtmService::open_with(&config, Arc::new(embedder), Arc::new(engine.clone())).unwrap();
    Harness {
        service,
        engine,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(KeywordEmbedder::new())
}

async fn stream(service: &LtmService, payload: PromptPayload) -> (String, Option<String>) {
    let mut streamed = String::new();
    let reply = service
        .stream_response(payload, |chunk: &str| streamed.push_str(chunk))
        .await
        .unwrap();
    (streamed, reply)
}

#[tokio::test]
async fn test_buy_milk_scenario() {
    let h = harness_with(KeywordEmbedder::new().with_weight("milk", 3.0));
    let id = h
        .service
        .ingest("Remember to buy milk", &[] as &[&str], GLOBAL_PERSONA)
        .await
        .unwrap();
    assert_eq!(id, 1);

    let options = RetrieveOptions {
        persona: Some(GLOBAL_PERSONA.to_string()),
        isolate: false,
    };
    let results = h.service.retrieve("milk", 5, &options).await.unwrap();
    let hit = results.iter().find(|m| m.id == 1).expect("id 1 retrieved");
    assert!(hit.distance < 0.3);
}

#[tokio::test]
async fn test_exact_text_round_trip_for_every_entry() {
    let h = harness();
    let texts = [
        "The Human lives in Helsinki",
        "Favourite colour is green",
        "Owns a bicycle named Blue",
        "Works night shifts at the observatory",
    ];
    for text in texts {
        h.service.ingest(text, &["fact"], "Ada").await.unwrap();
    }

    for text in texts {
        let results = h
            .service
            .retrieve(text, 5, &RetrieveOptions::unrestricted())
            .await
            .unwrap();
        let hit = results.iter().find(|m| m.text == text).unwrap();
        assert!(hit.distance < 0.1);
    }
}

#[tokio::test]
async fn test_alice_entries_never_reach_bob() {
    let h = harness_with(KeywordEmbedder::new().with_weight("gardening", 3.0));
    for i in 0..10 {
        h.service
            .ingest(&format!("Alice note {i} about gardening"), &["hobby"], "Alice")
            .await
            .unwrap();
        h.service
            .ingest(&format!("Shared note {i} about gardening"), &["hobby"], "Global")
            .await
            .unwrap();
    }

    for limit in [1, 5, 10, 20] {
        let results = h
            .service
            .retrieve("gardening", limit, &RetrieveOptions::isolated("Bob"))
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|m| m.persona == GLOBAL_PERSONA));
        assert!(results.iter().all(|m| m.distance < 0.75));
    }

    let unrestricted = h
        .service
        .retrieve("gardening", 20, &RetrieveOptions::unrestricted())
        .await
        .unwrap();
    assert!(unrestricted.iter().any(|m| m.persona == "Alice"));
}

#[tokio::test]
async fn test_clear_leaves_store_reusable() {
    let h = harness();
    h.service
        .ingest("The Human loves oat milk", &["food"], GLOBAL_PERSONA)
        .await
        .unwrap();
    assert_eq!(h.service.clear().await.unwrap(), 1);

    let results = h
        .service
        .retrieve("oat milk", 5, &RetrieveOptions::unrestricted())
        .await
        .unwrap();
    assert!(results.is_empty());

    h.service
        .ingest("The Human loves oat milk", &["food"], GLOBAL_PERSONA)
        .await
        .unwrap();
    let results = h
        .service
        .retrieve("oat milk", 5, &RetrieveOptions::unrestricted())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_create_session_fast_path_loads_once() {
    let h = harness();
    let a = h.service.create_session("modelA", "prompt").await.unwrap();
    let b = h.service.create_session("modelA", "prompt").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(h.engine.load_count(), 1);
}

#[tokio::test]
async fn test_swap_disposes_before_loading() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();
    h.service.create_session("modelB", "prompt").await.unwrap();

    let events = h.engine.events();
    let pos = |e: EngineEvent| events.iter().position(|x| *x == e).unwrap();
    let load_b = pos(EngineEvent::Load("modelB".into()));
    assert!(pos(EngineEvent::DropSession("modelA".into())) < load_b);
    assert!(pos(EngineEvent::DropContext("modelA".into())) < load_b);
    assert!(pos(EngineEvent::Release("modelA".into())) < load_b);
    assert!(pos(EngineEvent::DropModel("modelA".into())) < load_b);
    assert_eq!(h.engine.max_resident(), 1);
}

#[tokio::test]
async fn test_chunks_equal_final_text() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();
    h.engine
        .push_reply(MockReply::text(&["Once", " upon", " a", " time", "", "."]));

    let (streamed, reply) = stream(&h.service, PromptPayload::new("Tell me a story")).await;
    assert_eq!(reply.as_deref(), Some(streamed.as_str()));
    assert_eq!(streamed, "Once upon a time.");
}

#[tokio::test]
async fn test_auto_ingest_threshold() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();

    // 19 characters: never ingested.
    let short = "abcdefghij klmnopqr";
    assert_eq!(short.chars().count(), 19);
    stream(&h.service, PromptPayload::new(short)).await;
    h.service.settle().await;
    assert_eq!(h.service.store().count().await.unwrap(), 0);

    // 20 characters with a reply: exactly one entry.
    let long = "abcdefghij klmnopqrs";
    assert_eq!(long.chars().count(), 20);
    h.engine.push_reply(MockReply::text(&["Sure. More later."]));
    stream(&h.service, PromptPayload::new(long)).await;
    h.service.settle().await;

    let entries = h.service.store().list_recent(10, None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].tags.iter().any(|t| t == AUTO_MEMORY_TAG));
    assert_eq!(
        entries[0].text,
        format!("Log - Human stated: \"{long}\" | AI replied: \"Sure\"")
    );
}

#[tokio::test]
async fn test_empty_reply_is_not_ingested() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();
    h.engine.push_reply(MockReply::text(&[]));

    let (_, reply) = stream(
        &h.service,
        PromptPayload::new("A sufficiently long user message"),
    )
    .await;
    assert_eq!(reply.as_deref(), Some(""));
    h.service.settle().await;
    assert_eq!(h.service.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_generation_error_reports_chunk_and_none() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();
    h.engine
        .push_reply(MockReply::FailAfter(vec![], "CUDA out of memory".into()));

    let (streamed, reply) = stream(&h.service, PromptPayload::new("hello there")).await;
    assert!(reply.is_none());
    assert_eq!(streamed, GENERATION_ERROR_CHUNK);
}

#[tokio::test]
async fn test_stream_without_session_is_explicit_error() {
    let h = harness();
    let result = h
        .service
        .stream_response(PromptPayload::new("hello"), |_: &str| {})
        .await;
    assert!(matches!(result, Err(StreamError::Session(_))));

    let mut rx = h.service.stream_channel(PromptPayload::new("hello"));
    assert!(matches!(rx.recv().await, Some(StreamEvent::Error { .. })));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_swap_waits_for_in_flight_stream() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();

    let gate = Arc::new(Notify::new());
    h.engine
        .push_reply(MockReply::Gated(gate.clone(), vec!["done".into()]));

    let streaming = {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .stream_response(PromptPayload::new("hi"), |_: &str| {})
                .await
        })
    };

    // Wait until the generation is running on modelA.
    while h.engine.prompts().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let swapping = {
        let service = h.service.clone();
        tokio::spawn(async move { service.create_session("modelB", "prompt").await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.load_count(), 1, "swap must wait for the stream");
    assert!(!swapping.is_finished());

    gate.notify_one();
    let reply = streaming.await.unwrap().unwrap();
    assert_eq!(reply.as_deref(), Some("done"));
    swapping.await.unwrap().unwrap();

    let events = h.engine.events();
    let prompt = events
        .iter()
        .position(|e| matches!(e, EngineEvent::Prompt { model, .. } if model == "modelA"))
        .unwrap();
    let release_a = events
        .iter()
        .position(|e| *e == EngineEvent::Release("modelA".into()))
        .unwrap();
    let load_b = events
        .iter()
        .position(|e| *e == EngineEvent::Load("modelB".into()))
        .unwrap();
    assert!(prompt < release_a && release_a < load_b);
    assert_eq!(h.engine.max_resident(), 1);
    assert_eq!(h.service.session_state(), SessionState::Ready);
}

#[tokio::test]
async fn test_persona_session_and_isolated_ingest() {
    let h = harness();
    let mut persona = Persona::new("Ada", "modelA");
    persona.isolate = true;
    h.service
        .create_persona_session(&persona, "You are Ada.")
        .await
        .unwrap();

    let payload = PromptPayload::for_persona("I started learning the cello today", &persona);
    stream(&h.service, payload).await;
    h.service.settle().await;

    let ada = h.service.store().list_recent(10, Some("Ada")).await.unwrap();
    assert_eq!(ada.len(), 1);
    assert!(ada[0].text.starts_with("Log - Human stated: \"I started learning the cello today\""));
}

#[tokio::test]
async fn test_channel_streams_and_finishes() {
    let h = harness();
    h.service.create_session("modelA", "prompt").await.unwrap();
    h.engine.push_reply(MockReply::text(&["x", "y", "z"]));

    let mut rx = h.service.stream_channel(PromptPayload::new("letters"));
    let mut chunks = String::new();
    let mut final_text = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Chunk(c) => chunks.push_str(&c),
            StreamEvent::Done { final_text: f } => final_text = f,
            StreamEvent::Error { message } => panic!("unexpected error: {message}"),
        }
    }
    assert_eq!(final_text.as_deref(), Some(chunks.as_str()));
    assert_eq!(chunks, "xyz");
}

fn ndjson(lines: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/x-ndjson")
        .set_body_string(lines.join("\n") + "\n")
}

async fn mount_generate(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"done":true}"#))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_long_conversation_history_is_bounded_by_persona_window() {
    let h = harness();
    let mut persona = Persona::new("Ada", "modelA");
    persona.context_length = Some(256);
    h.service.create_persona_session(&persona, "").await.unwrap();

    let message = format!("Tell me more about the weather today {}", "please ".repeat(8));
    for _ in 0..30 {
        stream(&h.service, PromptPayload::for_persona(message.clone(), &persona)).await;
    }
    h.service.settle().await;

    let lengths: Vec<usize> = h
        .engine
        .events()
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Prompt { history_len, .. } => Some(*history_len),
            _ => None,
        })
        .collect();
    assert_eq!(lengths.len(), 30);
    assert!(lengths.iter().all(|&n| n <= 10), "{lengths:?}");
}

#[tokio::test]
async fn test_http_engine_end_to_end() {
    let server = MockServer::start().await;
    mount_generate(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ndjson(&[
            r#"{"message":{"role":"assistant","content":"You like "},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"oat milk."},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        ]))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(
        &dir.path().join("memory.db"),
        Arc::new(KeywordEmbedder::new().with_weight("milk", 3.0)),
        RetrievalSettings::default(),
    )
    .unwrap();
    let service = LtmService::from_parts(
        store,
        Arc::new(OllamaEngine::new(server.uri()).unwrap()),
        SessionSettings::default(),
        StreamSettings::default(),
    );

    service
        .ingest("The Human loves oat milk", &["food"], GLOBAL_PERSONA)
        .await
        .unwrap();
    service.create_session("llama3", "Be brief.").await.unwrap();

    let (streamed, reply) = stream(&service, PromptPayload::new("What milk do I like?")).await;
    assert_eq!(streamed, "You like oat milk.");
    assert_eq!(reply.as_deref(), Some("You like oat milk."));

    let requests = server.received_requests().await.unwrap();
    let chat = requests
        .iter()
        .find(|r| r.url.path() == "/api/chat")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&chat.body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    let user = messages.last().unwrap()["content"].as_str().unwrap();
    assert!(user.starts_with(MEMORY_NOTE_HEADER));
    assert!(user.contains("- [food] The Human loves oat milk"));
    assert!(user.ends_with("\n\nHuman: What milk do I like?"));

    service.shutdown().await;
    assert_eq!(service.store().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_http_engine_vision_timeout() {
    let server = MockServer::start().await;
    mount_generate(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ndjson(&[r#"{"message":{"content":"too late"},"done":true}"#])
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(
        &dir.path().join("memory.db"),
        Arc::new(KeywordEmbedder::new()),
        RetrievalSettings::default(),
    )
    .unwrap();
    let service = LtmService::from_parts(
        store,
        Arc::new(OllamaEngine::new(server.uri()).unwrap()),
        SessionSettings::default(),
        StreamSettings {
            vision_timeout: Duration::from_millis(200),
            ..StreamSettings::default()
        },
    );
    service.create_session("llava", "").await.unwrap();

    let payload = PromptPayload {
        image: Some("data:image/jpeg;base64,aGVsbG8=".to_string()),
        ..PromptPayload::new("What do you see in this photo?")
    };
    let started = std::time::Instant::now();
    let (streamed, reply) = stream(&service, payload).await;

    assert!(reply.is_none());
    assert!(streamed.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(service.session_state(), SessionState::Ready);
}
