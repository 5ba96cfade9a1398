mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use struct_sync::{
    DataError, RuntimeType, Struct, StructError, TransportError, UndoToken, ValidationError,
};

use common::{
    Person, RecordingRequester, StalledRequester, client, eventually, person_row, row,
};

#[tokio::test]
async fn construction_announces_the_structure() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, _socket) = client(requester.clone());
    let _people = Struct::<Person>::new(&client)?;

    let announced = eventually(|| !requester.bodies("/struct/Person/connect").is_empty()).await;
    assert!(announced);
    assert_eq!(
        requester.bodies("/struct/Person/connect"),
        vec![json!({"structure": {"age": "integer", "name": "text"}})]
    );
    Ok(())
}

#[tokio::test]
async fn create_validates_before_posting() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, _socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    let invalid = people.create(row(json!({"name": "Ada", "age": "36"}))).await;
    assert!(matches!(
        invalid,
        Err(StructError::Validation(ValidationError::TypeMismatch {
            ref field,
            expected: RuntimeType::Number,
        })) if field == "age"
    ));
    assert!(requester.bodies("/struct/Person/create").is_empty());

    people
        .create(row(json!({"name": "Ada", "age": 36})))
        .await?;
    assert_eq!(
        requester.bodies("/struct/Person/create"),
        vec![json!({"name": "Ada", "age": 36})]
    );
    assert_eq!(people.cache_len(), 0);
    Ok(())
}

#[tokio::test]
async fn create_from_serializes_records() -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct NewPerson<'a> {
        name: &'a str,
        age: i64,
    }

    let requester = Arc::new(RecordingRequester::default());
    let (client, _socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    people
        .create_from(&NewPerson {
            name: "Grace",
            age: 40,
        })
        .await?;
    assert_eq!(
        requester.bodies("/struct/Person/create"),
        vec![json!({"name": "Grace", "age": 40})]
    );
    Ok(())
}

#[tokio::test]
async fn update_posts_patch_and_waits_for_confirmation() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    let ada = people.from_id("p1").await?;

    let token = ada
        .update(|current| {
            let age = current.get("age").and_then(|age| age.as_i64()).unwrap_or(0);
            row(json!({"age": age + 1}))
        })
        .await?;

    assert_eq!(
        requester.bodies("/struct/Person/update"),
        vec![json!({"age": 37, "id": "p1"})]
    );
    assert_eq!(ada.get("age"), Some(json!(36)));
    assert_eq!(
        token,
        UndoToken {
            schema: "Person".to_string(),
            id: "p1".to_string(),
            previous: row(json!({"age": 36})),
        }
    );

    socket.dispatch("struct:Person:update", &json!({"id": "p1", "age": 37}));
    assert_eq!(ada.get("age"), Some(json!(37)));

    ada.undo(&token).await?;
    assert_eq!(
        requester.bodies("/struct/Person/update").last(),
        Some(&json!({"age": 36, "id": "p1"}))
    );
    Ok(())
}

#[tokio::test]
async fn undo_tokens_survive_serialization_and_reject_other_records() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    socket.dispatch("struct:Person:create", &person_row("p2", "Grace", 40));
    let ada = people.from_id("p1").await?;
    let grace = people.from_id("p2").await?;

    let token = ada.update(|_| row(json!({"name": "Ada L."}))).await?;
    let wire = serde_json::to_string(&token)?;
    let restored: UndoToken = serde_json::from_str(&wire)?;
    assert_eq!(restored, token);

    let mismatch = grace.undo(&restored).await;
    assert!(matches!(mismatch, Err(StructError::UndoMismatch { .. })));
    ada.undo(&restored).await?;
    assert_eq!(
        requester.bodies("/struct/Person/update").last(),
        Some(&json!({"name": "Ada", "id": "p1"}))
    );
    Ok(())
}

#[tokio::test]
async fn update_rejects_invalid_patches_locally() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    let ada = people.from_id("p1").await?;

    let unknown = ada.update(|_| row(json!({"nickname": "A"}))).await;
    assert!(matches!(
        unknown,
        Err(StructError::Validation(ValidationError::UnknownField { .. }))
    ));
    let empty = ada.update(|_| row(json!({}))).await;
    assert!(matches!(
        empty,
        Err(StructError::Validation(ValidationError::Empty))
    ));
    assert!(requester.bodies("/struct/Person/update").is_empty());
    Ok(())
}

#[tokio::test]
async fn unresolved_update_leaves_snapshot_unchanged() -> anyhow::Result<()> {
    let requester = Arc::new(StalledRequester::default());
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    let ada = people.cached("p1").expect("cached");
    let before = ada.snapshot();

    let pending = tokio::time::timeout(
        Duration::from_millis(50),
        ada.update(|_| row(json!({"age": 99}))),
    )
    .await;

    assert!(pending.is_err());
    assert_eq!(ada.snapshot(), before);
    assert!(
        requester
            .attempts
            .lock()
            .expect("attempts lock")
            .contains(&"/struct/Person/update".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn failed_mutations_surface_transport_errors() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.reject("/struct/Person/update", "denied");
    requester.reject("/struct/Person/delete", "denied");
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    let ada = people.cached("p1").expect("cached");

    let update = ada.update(|_| row(json!({"age": 1}))).await;
    assert_eq!(
        update.map(|_| ()).map_err(|error| error.to_string()),
        Err("struct_transport_rejected:denied".to_string())
    );
    assert!(matches!(
        ada.delete().await,
        Err(StructError::Transport(TransportError::Rejected { .. }))
    ));
    assert_eq!(ada.get("age"), Some(json!(36)));
    assert!(people.cached("p1").is_some());
    Ok(())
}

#[tokio::test]
async fn lifecycle_requests_send_the_snapshot() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    let ada = people.cached("p1").expect("cached");

    ada.set_archive(true).await?;
    ada.set_archive(false).await?;
    ada.delete().await?;

    let snapshot = person_row("p1", "Ada", 36);
    assert_eq!(requester.bodies("/struct/Person/archive"), vec![snapshot.clone()]);
    assert_eq!(requester.bodies("/struct/Person/unarchive"), vec![snapshot.clone()]);
    assert_eq!(requester.bodies("/struct/Person/delete"), vec![snapshot]);
    assert!(people.cached("p1").is_some());
    Ok(())
}

#[tokio::test]
async fn from_id_fetches_once_then_serves_the_cache() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.respond("/struct/Person/", person_row("p7", "Linus", 55));
    let (client, _socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    let first = people.from_id("p7").await?;
    let second = people.from_id("p7").await?;

    assert!(first.ptr_eq(&second));
    assert_eq!(requester.bodies("/struct/Person/"), vec![json!({"id": "p7"})]);
    assert_eq!(
        first.record()?,
        Person {
            id: "p7".to_string(),
            name: "Linus".to_string(),
            age: 55,
        }
    );
    Ok(())
}

#[tokio::test]
async fn from_id_rejects_non_row_responses() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.respond("/struct/Person/", json!(["p7"]));
    let (client, _socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    let result = people.from_id("p7").await;
    assert!(matches!(
        result,
        Err(StructError::UnexpectedResponse { ref path, .. }) if path == "/struct/Person/"
    ));
    Ok(())
}

#[tokio::test]
async fn all_returns_immediately_and_populates_in_background() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.respond(
        "/struct/Person/all",
        json!([person_row("p1", "Ada", 36), person_row("p2", "Grace", 40)]),
    );
    let (client, _socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    let all = people.all();
    assert!(all.is_empty());

    assert!(eventually(|| all.len() == 2).await);
    let ada = people.cached("p1").expect("interned by population");
    assert!(all.get("p1").expect("member").ptr_eq(&ada));
    Ok(())
}

#[tokio::test]
async fn live_collections_follow_lifecycle_events() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.respond("/struct/Person/all", json!([person_row("p1", "Ada", 36)]));
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    let all = people.all_loaded().await?;
    assert_eq!(all.ids(), vec!["p1"]);

    socket.dispatch("struct:Person:create", &person_row("p2", "Grace", 40));
    socket.dispatch("struct:Person:create", &person_row("p2", "Grace", 40));
    assert_eq!(all.ids(), vec!["p1", "p2"]);

    socket.dispatch("struct:Person:archive", &json!("p1"));
    assert_eq!(all.ids(), vec!["p2"]);

    socket.dispatch("struct:Person:restore", &json!("p1"));
    assert_eq!(all.ids(), vec!["p2", "p1"]);

    socket.dispatch("struct:Person:delete", &json!("p2"));
    assert_eq!(all.ids(), vec!["p1"]);
    Ok(())
}

#[tokio::test]
async fn archived_is_a_one_shot_snapshot() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let mut old = person_row("p9", "Old", 90);
    old["archived"] = json!(true);
    requester.respond("/struct/Person/archived", json!([old]));
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    let archived = people.archived().await?;
    assert_eq!(archived.len(), 1);
    assert!(archived[0].archived());

    let mut late = person_row("p10", "Late", 91);
    late["archived"] = json!(true);
    socket.dispatch("struct:Person:create", &late);
    assert_eq!(archived.len(), 1);
    assert_eq!(people.default_archived().len(), 2);
    Ok(())
}

#[tokio::test]
async fn collections_detach_after_last_unsubscribe() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.respond("/struct/Person/all", json!([]));
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    let all = people.all_loaded().await?;

    let subscription = all.subscribe(|_| {});
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    assert_eq!(all.len(), 1);

    subscription.unsubscribe();
    socket.dispatch("struct:Person:create", &person_row("p2", "Grace", 40));
    assert_eq!(all.ids(), vec!["p1"]);
    assert!(people.default_all().contains("p2"));
    Ok(())
}

#[tokio::test]
async fn from_property_is_live_and_filtered() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    requester.respond(
        "/struct/Person/from-property",
        json!([person_row("p1", "Ada", 36)]),
    );
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;

    let thirty_six = people.from_property("age", json!(36)).await?;
    assert_eq!(
        requester.bodies("/struct/Person/from-property"),
        vec![json!({"property": "age", "value": 36})]
    );
    assert_eq!(thirty_six.ids(), vec!["p1"]);

    socket.dispatch("struct:Person:create", &person_row("p2", "Grace", 40));
    socket.dispatch("struct:Person:create", &person_row("p3", "Alan", 36));
    assert_eq!(thirty_six.ids(), vec!["p1", "p3"]);

    socket.dispatch("struct:Person:update", &json!({"id": "p1", "age": 37}));
    assert_eq!(thirty_six.ids(), vec!["p3"]);
    Ok(())
}

#[tokio::test]
async fn version_history_wraps_rows() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let mut version = person_row("p1", "Ada (draft)", 35);
    version["vhId"] = json!("4");
    version["vhCreated"] = json!("2024-02-01 09:30:00");
    requester.respond("/struct/Person/version-history", json!([version]));
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch("struct:Person:create", &person_row("p1", "Ada", 36));
    let ada = people.cached("p1").expect("cached");

    let history = ada.version_history().await?;
    assert_eq!(
        requester.bodies("/struct/Person/version-history"),
        vec![json!({"id": "p1"})]
    );
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].vh_id(), "4");
    assert!(history[0].vh_created().is_some());
    assert_eq!(history[0].record()?.name, "Ada (draft)");

    history[0].restore().await?;
    assert_eq!(
        requester.bodies("/struct/Person/restore-version"),
        vec![json!({"id": "p1", "vhId": "4"})]
    );
    Ok(())
}

#[tokio::test]
async fn pull_projects_and_reports_missing_fields() -> anyhow::Result<()> {
    let requester = Arc::new(RecordingRequester::default());
    let (client, socket) = client(requester.clone());
    let people = Struct::<Person>::new(&client)?;
    socket.dispatch(
        "struct:Person:create",
        &json!({"id": "p1", "archived": false, "name": "Ada"}),
    );
    let ada = people.cached("p1").expect("cached");

    assert_eq!(
        ada.pull(&["name", "age"]).err(),
        Some(DataError::FieldUnavailable {
            field: "age".to_string()
        })
    );
    let name = ada.pull(&["name"])?;
    assert_eq!(name.get(), row(json!({"name": "Ada"})));

    socket.dispatch("struct:Person:update", &json!({"id": "p1", "name": "Ada L."}));
    assert_eq!(name.get(), row(json!({"name": "Ada L."})));
    Ok(())
}
