use palm_mq::mq::rpc::{
    client_queue, parse_request_routing_key, request_routing_key, response_routing_key,
    server_queue, DEFAULT_RPC_EXCHANGE,
};
use palm_mq::mq::stream::{local_queue, remote_queue, ConnectionFrame, FRAME_CHUNK_SIZE};
use palm_mq::mq::MqError;
use rstest::rstest;

#[rstest]
#[case("echo", "node-1", "rpc.echo.node-1")]
#[case("scan_ports", "edge-eu", "rpc.scan_ports.edge-eu")]
fn test_request_key_round_trip(#[case] function: &str, #[case] node: &str, #[case] key: &str) {
    assert_eq!(request_routing_key(function, node), key);
    let (parsed_function, parsed_node) = parse_request_routing_key(key).unwrap();
    assert_eq!(parsed_function, function);
    assert_eq!(parsed_node, node);
}

#[test]
fn test_reply_and_queue_names() {
    assert_eq!(DEFAULT_RPC_EXCHANGE, "palm-rpc");
    assert_eq!(response_routing_key("cli-7"), "rpc-response.cli-7");
    assert_eq!(client_queue("cli-7"), "rpc-client-queue-cli-7");
    assert_eq!(local_queue("a"), "amqp-fakeconn-local-queue-a");
    assert_eq!(remote_queue("b"), "amqp-fakeconn-remote-core-queue-b");
}

#[test]
fn test_server_queue_is_stable_per_function_set() {
    let functions = vec!["echo".to_string(), "ping".to_string()];
    let queue = server_queue("node-1", &functions);

    let hash = queue.strip_prefix("node-queue.node-1.").unwrap();
    assert_eq!(hash.len(), 40);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(queue, server_queue("node-1", &functions));
    assert_ne!(queue, server_queue("node-2", &functions));
}

#[test]
fn test_invalid_request_key() {
    assert!(matches!(
        parse_request_routing_key("rpc-response.cli-7"),
        Err(MqError::InvalidRoutingKey(_))
    ));
}

#[test]
fn test_frame_flags_survive_encoding() {
    let data = ConnectionFrame::data("a", vec![7; FRAME_CHUNK_SIZE]);
    let decoded = ConnectionFrame::decode(&data.encode().unwrap()).unwrap();
    assert_eq!(decoded.buf.len(), FRAME_CHUNK_SIZE);
    assert!(!decoded.first && !decoded.closed);

    let helo = ConnectionFrame::decode(&ConnectionFrame::helo("a").encode().unwrap()).unwrap();
    assert!(helo.first);
    assert_eq!(helo.from, "a");

    let closed = ConnectionFrame::decode(&ConnectionFrame::closed("a").encode().unwrap()).unwrap();
    assert!(closed.closed);
}
