//! Property-based tests for the decorators.
//!
//! Key invariants:
//! 1. Multiplexed ids and their origins form a bijection at all times
//! 2. Multiplexed ids are never handed out twice
//! 3. Reliable messages arrive in send order, whatever the jitter

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mirage_networking::{ConnectionLookup, LatencyConfig, LatencySimulation, MemoryHub, MemoryTransport};
use mirage_shared::{
    ChannelId, ClientEvents, ConnectionId, EventLog, ManualClock, ServerEvents, Transport,
};
use proptest::prelude::*;

/// One lookup operation: (transport index, original id, connect?).
fn lookup_op_strategy() -> impl Strategy<Value = (usize, u32, bool)> {
    (0usize..3, 1u32..16, any::<bool>())
}

proptest! {
    #[test]
    fn prop_lookup_is_a_bijection(ops in prop::collection::vec(lookup_op_strategy(), 1..200)) {
        let mut lookup = ConnectionLookup::new();
        let mut model: HashMap<(ConnectionId, usize), ConnectionId> = HashMap::new();
        let mut handed_out: HashSet<ConnectionId> = HashSet::new();

        for (transport, original, connect) in ops {
            let original = ConnectionId(original);
            let key = (original, transport);

            if connect && !model.contains_key(&key) {
                let id = lookup.add_to_lookup(original, transport).unwrap();
                prop_assert!(handed_out.insert(id), "id {} handed out twice", id);
                prop_assert_ne!(id, ConnectionId::SERVER);
                model.insert(key, id);
            } else if !connect && model.contains_key(&key) {
                let removed = lookup.remove_from_lookup(original, transport);
                prop_assert_eq!(removed, Ok(model[&key]));
                model.remove(&key);
            }

            prop_assert_eq!(lookup.len(), model.len());
            for (&(original, transport), &id) in &model {
                prop_assert_eq!(lookup.multiplex_id(original, transport), Ok(id));
                prop_assert_eq!(lookup.original_id(id), Ok((original, transport)));
            }
        }
    }

    #[test]
    fn prop_reliable_order_survives_jitter(
        jitter in 0.0f64..1.0,
        jitter_speed in 0.0f64..50.0,
        latency_ms in 0.0f64..300.0,
        gaps in prop::collection::vec(0u64..40, 1..120),
        seed in any::<u64>(),
    ) {
        let hub = MemoryHub::new();
        let clock = ManualClock::new();

        let mut server = MemoryTransport::new(&hub, "memory", "localhost:7777");
        let log = EventLog::new();
        server.server_start(ServerEvents::new(log.clone())).unwrap();

        let config = LatencyConfig {
            jitter,
            jitter_speed,
            reliable_latency_ms: latency_ms,
            ..LatencyConfig::passthrough()
        }
        .with_seed(seed);
        let inner = MemoryTransport::new(&hub, "memory", "client:1");
        let mut client = LatencySimulation::with_clock(inner, config, Arc::new(clock.clone()));
        client.client_connect("localhost:7777", ClientEvents::ignore()).unwrap();
        server.server_early_update();
        client.client_early_update();
        prop_assert!(client.client_connected());

        let count = gaps.len();
        for (i, gap) in gaps.into_iter().enumerate() {
            client.client_send(&(i as u32).to_le_bytes(), ChannelId::RELIABLE).unwrap();
            clock.advance_millis(gap);
            client.client_late_update();
            server.server_early_update();
        }
        clock.advance_millis(2_000);
        client.client_late_update();
        server.server_early_update();

        let expected: Vec<Vec<u8>> = (0..count as u32).map(|i| i.to_le_bytes().to_vec()).collect();
        prop_assert_eq!(log.payloads(), expected);
        prop_assert_eq!(client.pending_client(), 0);
    }
}
