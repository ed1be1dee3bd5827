//! Debounce/coalescing (spec §4.4): several rapid local updates inside the
//! quiet period fan out as a single flush, not one per update.

mod support;

use std::time::Duration;

use braid_collab::app::App;
use braid_collab::bus::LocalBus;
use braid_collab::protocol::Frame;
use braid_collab::types::Permission;

#[tokio::test]
async fn three_rapid_updates_inside_the_quiet_period_merge_into_one_flush() {
	let bus = LocalBus::new(16);
	let (app, _mem) = App::with_bus(support::test_config(), bus);
	let doc = app.registry.get("debounced").await;

	let (writer, _writer_q) = doc.attach(vec![Permission::Write]).await;
	let (_reader, reader_q) = doc.attach(vec![Permission::Read]).await;

	for text in ["a", "b", "c"] {
		doc.apply_local_update(&support::make_update(text), writer).await.unwrap();
		tokio::time::sleep(Duration::from_millis(5)).await;
	}

	// Nothing should have reached the reader yet: all three edits landed
	// well inside the 20ms debounce delay configured by test_config().
	assert!(reader_q.try_pop().is_none());

	tokio::time::sleep(Duration::from_millis(150)).await;

	let mut flushed = Vec::new();
	while let Some(frame) = reader_q.try_pop() {
		flushed.push(frame);
	}
	assert_eq!(flushed.len(), 1, "expected exactly one merged flush, got {}", flushed.len());

	let decoded = Frame::decode(&flushed[0]).unwrap();
	assert!(matches!(decoded, Frame::Update { .. }));
}

#[tokio::test]
async fn origin_of_a_debounced_update_never_receives_its_own_echo() {
	let bus = LocalBus::new(16);
	let (app, _mem) = App::with_bus(support::test_config(), bus);
	let doc = app.registry.get("no-echo").await;

	let (writer, writer_q) = doc.attach(vec![Permission::Write]).await;
	doc.apply_local_update(&support::make_update("x"), writer).await.unwrap();

	tokio::time::sleep(Duration::from_millis(150)).await;
	assert!(writer_q.try_pop().is_none());
}
