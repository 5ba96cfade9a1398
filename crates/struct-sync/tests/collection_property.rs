mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};
use serde_json::{Value, json};
use struct_sync::{LocalSocket, Struct};

use common::{Person, RecordingRequester, client, person_row};

const IDS: [&str; 4] = ["p0", "p1", "p2", "p3"];

#[derive(Debug, Clone, Copy)]
enum Op {
    Create(usize),
    Update(usize),
    Archive(usize),
    Restore(usize),
    Delete(usize),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        let slot = usize::from(u8::arbitrary(g)) % IDS.len();
        match u8::arbitrary(g) % 5 {
            0 => Self::Create(slot),
            1 => Self::Update(slot),
            2 => Self::Archive(slot),
            3 => Self::Restore(slot),
            _ => Self::Delete(slot),
        }
    }
}

fn deliver(socket: &LocalSocket, op: Op) {
    match op {
        Op::Create(slot) => {
            socket.dispatch("struct:Person:create", &person_row(IDS[slot], "n", 1));
        }
        Op::Update(slot) => {
            socket.dispatch(
                "struct:Person:update",
                &json!({"id": IDS[slot], "age": slot}),
            );
        }
        Op::Archive(slot) => {
            socket.dispatch("struct:Person:archive", &Value::String(IDS[slot].to_string()));
        }
        Op::Restore(slot) => {
            socket.dispatch("struct:Person:restore", &Value::String(IDS[slot].to_string()));
        }
        Op::Delete(slot) => {
            socket.dispatch("struct:Person:delete", &Value::String(IDS[slot].to_string()));
        }
    }
}

/// Expected archived flag per live id.
fn model(ops: &[Op]) -> BTreeMap<&'static str, bool> {
    let mut state = BTreeMap::new();
    for op in ops {
        match *op {
            Op::Create(slot) => {
                state.entry(IDS[slot]).or_insert(false);
            }
            Op::Update(_) => {}
            Op::Archive(slot) => {
                if let Some(archived) = state.get_mut(IDS[slot]) {
                    *archived = true;
                }
            }
            Op::Restore(slot) => {
                if let Some(archived) = state.get_mut(IDS[slot]) {
                    *archived = false;
                }
            }
            Op::Delete(slot) => {
                state.remove(IDS[slot]);
            }
        }
    }
    state
}

fn ids_where(state: &BTreeMap<&'static str, bool>, archived: bool) -> BTreeSet<String> {
    state
        .iter()
        .filter(|(_, flag)| **flag == archived)
        .map(|(id, _)| (*id).to_string())
        .collect()
}

fn live_collection_matches_model(ops: Vec<Op>) -> TestResult {
    let requester = Arc::new(RecordingRequester::default());
    let (client, socket) = client(requester);
    let Ok(people) = Struct::<Person>::new(&client) else {
        return TestResult::error("struct construction failed");
    };
    let live = people.all();

    let split = ops.len() / 2;
    for op in &ops[..split] {
        deliver(&socket, *op);
    }
    let late = people.all();
    for op in &ops[split..] {
        deliver(&socket, *op);
    }

    let expected = model(&ops);
    let active = ids_where(&expected, false);
    let archived = ids_where(&expected, true);

    let live_ids = live.ids();
    let unique = live_ids.iter().cloned().collect::<BTreeSet<_>>();
    if unique.len() != live_ids.len() {
        return TestResult::error(format!("duplicate ids in live collection: {live_ids:?}"));
    }
    let cached = expected.keys().all(|id| people.cached(id).is_some());

    let late_ids = late.ids().into_iter().collect::<BTreeSet<_>>();

    TestResult::from_bool(
        unique == active
            && cached
            && people.cache_len() == expected.len()
            && people.default_all().ids().into_iter().collect::<BTreeSet<_>>() == active
            && people
                .default_archived()
                .ids()
                .into_iter()
                .collect::<BTreeSet<_>>()
                == archived
            && late_ids.is_subset(&active),
    )
}

#[test]
fn live_collections_track_lifecycle_events() {
    QuickCheck::new()
        .tests(300)
        .quickcheck(live_collection_matches_model as fn(Vec<Op>) -> TestResult);
}
