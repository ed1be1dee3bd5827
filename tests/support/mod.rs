//! Shared helpers for the integration tests (grounded in the teacher's own
//! `server/tests/common/` fixtures module).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use braid_collab::config::Config;
use yrs::{Doc, Map, Transact};

pub fn test_config() -> Config {
	let mut config = Config::from_env();
	config.instance_tag = uuid::Uuid::new_v4().to_string().into();
	config.debounce_delay = Duration::from_millis(20);
	config.debounce_max_delay = Duration::from_millis(100);
	config.idle_evict_ttl = Duration::from_millis(50);
	config
}

/// Build one valid yrs update blob by mutating a scratch document, the same
/// way a real client's local edit would produce one.
pub fn make_update(text: &str) -> Vec<u8> {
	let doc = Doc::new();
	let captured: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
	let sink = captured.clone();
	let _sub = doc
		.observe_update_v1(move |_txn, event| {
			*sink.lock().unwrap() = Some(event.update.clone());
		})
		.expect("observe_update_v1 is only called once per doc");

	{
		let mut txn = doc.transact_mut();
		let map = txn.get_or_insert_map("root");
		map.insert(&mut txn, "k", text);
	}

	captured.lock().unwrap().take().expect("mutation produces an update")
}
