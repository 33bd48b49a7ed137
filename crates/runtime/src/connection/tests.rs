use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

use super::*;
use crate::transport::PipeTransport;

fn create_test_connection() -> (Arc<Connection>, NotificationReceiver, DuplexStream, DuplexStream) {
	let (host_read, host_write) = duplex(4096);
	let (browser_read, browser_write) = duplex(4096);

	let (transport, message_rx) = PipeTransport::new(host_write, browser_read);
	let parts = transport.into_transport_parts(message_rx);
	let (connection, notifications) = Connection::new(parts);

	(connection, notifications, host_read, browser_write)
}

/// Reads one NUL-terminated request written by the connection.
async fn read_request(reader: &mut BufReader<DuplexStream>) -> Value {
	let mut frame = Vec::new();
	reader.read_until(0, &mut frame).await.unwrap();
	frame.pop();
	serde_json::from_slice(&frame).unwrap()
}

async fn write_frame(writer: &mut DuplexStream, message: Value) {
	let mut frame = serde_json::to_vec(&message).unwrap();
	frame.push(0);
	writer.write_all(&frame).await.unwrap();
	writer.flush().await.unwrap();
}

#[test]
fn test_request_format() {
	let request = Request {
		id: 0,
		method: "Target.attachToTarget".to_string(),
		params: json!({"targetId": "T1", "flatten": true}),
		session_id: None,
	};

	let value = serde_json::to_value(&request).unwrap();
	assert_eq!(value["method"], "Target.attachToTarget");
	assert_eq!(value["params"]["targetId"], "T1");
	assert!(value.get("sessionId").is_none());
}

#[test]
fn test_message_deserialization_response() {
	let json = r#"{"id": 42, "result": {"sessionId": "S"}}"#;
	let message: Message = serde_json::from_str(json).unwrap();

	match message {
		Message::Response(response) => {
			assert_eq!(response.id, 42);
			assert!(response.result.is_some());
			assert!(response.error.is_none());
		}
		_ => panic!("Expected Response"),
	}
}

#[test]
fn test_message_deserialization_event() {
	let json = r#"{"method": "Target.targetDestroyed", "params": {"targetId": "T1"}}"#;
	let message: Message = serde_json::from_str(json).unwrap();

	match message {
		Message::Event(event) => {
			assert_eq!(event.method, "Target.targetDestroyed");
			assert_eq!(event.params["targetId"], "T1");
			assert!(event.session_id.is_none());
		}
		_ => panic!("Expected Event"),
	}
}

#[tokio::test]
async fn test_dispatch_response_success() {
	let (connection, _notifications, _, _) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.insert(
		0,
		PendingRequest {
			method: "Target.createTarget".into(),
			tx,
		},
	);

	let response = Message::Response(Response {
		id: 0,
		result: Some(json!({"targetId": "T9"})),
		error: None,
	});
	connection.dispatch(response).unwrap();

	let result = rx.await.unwrap().unwrap();
	assert_eq!(result["targetId"], "T9");
}

#[tokio::test]
async fn test_dispatch_response_error() {
	let (connection, _notifications, _, _) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.insert(
		3,
		PendingRequest {
			method: "Target.closeTarget".into(),
			tx,
		},
	);

	let response = Message::Response(Response {
		id: 3,
		result: None,
		error: Some(ErrorPayload {
			code: -32602,
			message: "No target with given id found".to_string(),
			data: None,
		}),
	});
	connection.dispatch(response).unwrap();

	let err = rx.await.unwrap().unwrap_err();
	assert!(err.is_target_closed(), "Expected target closed error, got: {err:?}");
	assert!(err.to_string().starts_with("Target.closeTarget failed"));
}

#[tokio::test]
async fn test_dispatch_unknown_response_id() {
	let (connection, _notifications, _, _) = create_test_connection();
	let response = Message::Response(Response {
		id: 99,
		result: None,
		error: None,
	});
	assert!(matches!(connection.dispatch(response), Err(Error::ProtocolError(_))));
}

#[tokio::test]
async fn test_target_events_become_notifications() {
	let (connection, mut notifications, _, _) = create_test_connection();

	connection
		.dispatch(Message::Event(Event {
			method: "Target.targetCreated".into(),
			params: json!({"targetInfo": {"targetId": "T1", "type": "page", "url": "about:blank"}}),
			session_id: None,
		}))
		.unwrap();
	connection
		.dispatch(Message::Event(Event {
			method: "Runtime.consoleAPICalled".into(),
			params: json!({}),
			session_id: Some("S1".into()),
		}))
		.unwrap();
	connection
		.dispatch(Message::Event(Event {
			method: "Target.targetDestroyed".into(),
			params: json!({"targetId": "T1"}),
			session_id: None,
		}))
		.unwrap();

	let first = notifications.recv().await.unwrap();
	assert!(matches!(first, Notification::Created { ref info } if info.target_id == "T1"));
	let second = notifications.recv().await.unwrap();
	assert_eq!(second, Notification::destroyed("T1"));
	assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_attach_round_trip_over_pipe() {
	let (connection, _notifications, host_read, mut browser_write) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let browser = tokio::spawn(async move {
		let mut reader = BufReader::new(host_read);
		let request = read_request(&mut reader).await;
		assert_eq!(request["method"], "Target.attachToTarget");
		assert_eq!(request["params"]["flatten"], true);
		write_frame(&mut browser_write, json!({"id": request["id"], "result": {"sessionId": "S-1"}})).await;
		(reader, browser_write)
	});

	let session_id = connection.attach("T1").await.unwrap();
	assert_eq!(session_id, "S-1");
	let _ = browser.await.unwrap();
}

#[tokio::test]
async fn test_create_passes_context_id() {
	let (connection, _notifications, host_read, mut browser_write) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let browser = tokio::spawn(async move {
		let mut reader = BufReader::new(host_read);
		let request = read_request(&mut reader).await;
		assert_eq!(request["method"], "Target.createTarget");
		assert_eq!(request["params"]["browserContextId"], "C1");
		assert_eq!(request["params"]["url"], "about:blank");
		write_frame(&mut browser_write, json!({"id": request["id"], "result": {"targetId": "T7"}})).await;
		(reader, browser_write)
	});

	let target_id = connection.create(Some("C1"), None).await.unwrap();
	assert_eq!(target_id, "T7");
	let _ = browser.await.unwrap();
}

#[tokio::test]
async fn test_transport_close_fails_pending_and_ends_stream() {
	let (connection, mut notifications, host_read, browser_write) = create_test_connection();
	let runner = Arc::clone(&connection);
	let run_task = tokio::spawn(async move { runner.run().await });

	let pending = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { connection.version().await })
	};

	// Let the request reach the pipe, then hang up without answering.
	let mut reader = BufReader::new(host_read);
	let request = read_request(&mut reader).await;
	assert_eq!(request["method"], "Browser.getVersion");
	drop(browser_write);

	let result = tokio::time::timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
	assert!(result.unwrap_err().is_disconnected());
	assert!(notifications.recv().await.is_none());

	run_task.await.unwrap();
	assert!(connection.is_closed());
	assert!(connection.discover(true).await.unwrap_err().is_disconnected());
}

#[tokio::test]
async fn test_disconnect_ends_notification_stream() {
	let (connection, mut notifications, _host_read, _browser_write) = create_test_connection();
	let runner = Arc::clone(&connection);
	let run_task = tokio::spawn(async move { runner.run().await });

	connection.disconnect().await.unwrap();

	assert!(notifications.recv().await.is_none());
	tokio::time::timeout(Duration::from_secs(5), run_task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dropped_request_cleans_up_callback() {
	let (connection, _notifications, _host_read, _browser_write) = create_test_connection();

	let request = connection.send_command("Browser.getVersion", json!({}), None);
	let _ = tokio::time::timeout(Duration::from_millis(20), request).await;

	assert!(connection.callbacks.is_empty());
}
