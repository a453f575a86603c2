//! Integration tests for the world server
//!
//! These tests drive the server library through its public API: whole
//! simulation ticks, room lifecycle against a real account store, the
//! shipped maps, and real UDP traffic against a running server.

use assert_approx_eq::assert_approx_eq;
use bincode::{deserialize, serialize};
use server::config::{default_zones, monster_template, ZoneConfig, SMALL_COIN};
use server::entity::Player;
use server::game::{World, WorldEvent};
use server::geometry::{Collider, MapGeometry};
use server::network::{Server, ServerMessage, MAX_DATAGRAM_SIZE};
use server::persistence::{AccountStore, JsonAccountStore};
use server::room::Room;
use shared::{BehaviorState, InputFrame, Packet, GRAVITY, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 800x600 map with solid ground whose top edge is at y = 500.
fn flat_geometry() -> MapGeometry {
    MapGeometry {
        width: 800.0,
        height: 600.0,
        colliders: vec![Collider {
            x: 400.0,
            y: 516.0,
            width: 800.0,
            height: 32.0,
            one_way: false,
        }],
        spawn_points: vec![],
    }
}

fn frame(tick: u32) -> InputFrame {
    InputFrame {
        tick,
        ..Default::default()
    }
}

fn attack(tick: u32) -> InputFrame {
    InputFrame {
        attack: true,
        ..frame(tick)
    }
}

/// Spawns a monster that stands still until the test says otherwise.
fn idle_monster(world: &mut World, kind: &str, x: f32, y: f32) -> u32 {
    let id = world.spawn_monster(kind, x, y).unwrap();
    let monster = world.monsters.iter_mut().find(|m| m.id == id).unwrap();
    monster.behavior = BehaviorState::Idle;
    monster.behavior_until = f64::MAX;
    id
}

fn damage_events(world: &mut World) -> Vec<u32> {
    world
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            WorldEvent::MonsterTookDamage { monster_id, .. } => Some(monster_id),
            _ => None,
        })
        .collect()
}

/// SIMULATION PROPERTY TESTS
mod simulation_tests {
    use super::*;

    /// Tests that free fall adds exactly one gravity step per tick
    #[test]
    fn gravity_monotonicity() {
        let geometry = MapGeometry {
            width: 800.0,
            height: 100_000.0,
            ..Default::default()
        };
        let mut world = World::with_seed("sky", &geometry, 1);
        world.add_player(Player::new("alice", 100.0, 100.0));

        let mut previous_y = 100.0;
        let mut previous_vy = 0.0;
        for _ in 0..40 {
            world.step();
            let player = &world.players["alice"];
            assert_approx_eq!(player.velocity_y, previous_vy + GRAVITY);
            assert_approx_eq!(player.y, previous_y + player.velocity_y);
            assert!(player.velocity_y > previous_vy);
            previous_y = player.y;
            previous_vy = player.velocity_y;
        }
    }

    /// Tests that a one-way platform lets a body rise through it and catches
    /// it on the way down
    #[test]
    fn one_way_platform_asymmetry() {
        let geometry = MapGeometry {
            width: 800.0,
            height: 600.0,
            colliders: vec![Collider {
                x: 400.0,
                y: 300.0,
                width: 128.0,
                height: 32.0,
                one_way: true,
            }],
            spawn_points: vec![],
        };
        let mut world = World::with_seed("oneway", &geometry, 1);
        let mut player = Player::new("alice", 400.0, 360.0);
        player.velocity_y = -12.0;
        world.add_player(player);

        let mut previous_y = 360.0;
        loop {
            world.step();
            let player = &world.players["alice"];
            if player.velocity_y >= 0.0 {
                break;
            }
            // Rising straight through the platform, never put back.
            assert!(player.y < previous_y);
            previous_y = player.y;
        }
        assert!(previous_y < 300.0 - 16.0 - 16.0);

        for _ in 0..60 {
            world.step();
        }
        let player = &world.players["alice"];
        assert_eq!(player.y, 284.0 - 16.0);
        assert_eq!(player.velocity_y, 0.0);
    }

    /// Tests that two simultaneous claims on one item produce one pickup
    #[test]
    fn loot_exclusivity() {
        let mut world = World::with_seed("loot", &flat_geometry(), 1);
        world.add_player(Player::new("alice", 100.0, 484.0));
        world.add_player(Player::new("bob", 120.0, 484.0));
        world.spawn_loot(&SMALL_COIN, 110.0, 492.0, 0.0, 0.0);

        let grab = InputFrame {
            loot: true,
            ..frame(1)
        };
        world.enqueue_input("alice", grab.clone());
        world.enqueue_input("bob", grab);
        world.step();

        let holders: Vec<&str> = world
            .players
            .values()
            .filter(|p| p.inventory.get("Small Coin") == Some(&1))
            .map(|p| p.username.as_str())
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(world.loot[0].collected_by.as_deref(), Some(holders[0]));

        // The message path sees the same claim and is a no-op.
        assert!(!world.collect_loot("alice"));
        assert!(!world.collect_loot("bob"));
    }

    /// Tests that a burst of attack inputs inside one cooldown hits once
    #[test]
    fn cooldown_gating_burst() {
        let mut world = World::with_seed("gate", &flat_geometry(), 3);
        world.add_player(Player::new("alice", 100.0, 484.0));
        idle_monster(&mut world, "blackBoar", 140.0, 484.0);

        for tick in 1..=10 {
            world.enqueue_input("alice", attack(tick));
        }
        world.step();
        assert_eq!(damage_events(&mut world).len(), 1);

        for tick in 11..=20 {
            world.enqueue_input("alice", attack(tick));
            world.step();
        }
        assert!(damage_events(&mut world).is_empty());
    }

    /// Tests that holding attack lands one hit per cooldown period
    #[test]
    fn cooldown_gating_sustained() {
        let mut world = World::with_seed("gate", &flat_geometry(), 3);
        world.add_player(Player::new("alice", 100.0, 484.0));
        idle_monster(&mut world, "blackBoar", 140.0, 484.0);

        let mut hit_ticks = Vec::new();
        for tick in 1..=120 {
            world.enqueue_input("alice", attack(tick));
            world.step();
            if !damage_events(&mut world).is_empty() {
                hit_ticks.push(tick);
            }
        }

        assert_eq!(hit_ticks.len(), 4);
        for pair in hit_ticks.windows(2) {
            assert!(pair[1] - pair[0] >= 30);
        }
    }

    /// Tests the attack scenario: the gate closes at once and reopens only
    /// after 500ms, and a second target is not hit in between
    #[test]
    fn attack_cooldown_scenario() {
        let mut world = World::with_seed("gate", &flat_geometry(), 5);
        world.add_player(Player::new("alice", 100.0, 484.0));
        let first = idle_monster(&mut world, "blackBoar", 140.0, 484.0);
        idle_monster(&mut world, "blackBoar", 60.0, 484.0);

        world.enqueue_input("alice", attack(1));
        world.step();
        let attacked_at = world.now_ms;
        assert!(!world.players["alice"].can_attack.is_open());
        assert_eq!(damage_events(&mut world), vec![first]);

        for tick in 2..100 {
            world.enqueue_input("alice", attack(tick));
            world.step();
            let hits = damage_events(&mut world);
            if !hits.is_empty() {
                assert!(world.now_ms - attacked_at >= 500.0 - 1e-6);
                assert_eq!(hits, vec![first]);
                return;
            }
            assert!(!world.players["alice"].can_attack.is_open());
        }
        panic!("attack gate never reopened");
    }

    /// Tests that crossing a threshold levels up exactly once
    #[test]
    fn level_up_boundary() {
        let mut world = World::with_seed("xp", &flat_geometry(), 1);
        let mut player = Player::new("alice", 100.0, 484.0);
        player.experience = 99;
        world.add_player(player);
        world.spawn_loot(&SMALL_COIN, 100.0, 492.0, 0.0, 0.0);

        assert!(world.collect_loot("alice"));
        for _ in 0..10 {
            world.step();
        }

        let level_ups = world
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, WorldEvent::PlayerLevelUp { .. }))
            .count();
        assert_eq!(level_ups, 1);
        let player = &world.players["alice"];
        assert_eq!(player.level, 2);
        assert_eq!(player.experience, 100);
        assert_eq!(player.current_health, player.max_health);
    }

    /// Tests the death scenario: removal in the same tick and 1-3 drops from
    /// the monster's own loot table
    #[test]
    fn monster_death_loot() {
        for seed in 0..10 {
            let mut world = World::with_seed("death", &flat_geometry(), seed);
            world.add_player(Player::new("alice", 100.0, 484.0));
            let id = idle_monster(&mut world, "bee", 140.0, 484.0);
            world.monsters[0].current_health = 20;

            world.enqueue_input("alice", attack(1));
            world.step();

            assert!(world.monsters.iter().all(|m| m.id != id));
            assert!((1..=3).contains(&world.loot.len()));
            let table: Vec<&str> = monster_template("bee")
                .unwrap()
                .loot
                .iter()
                .map(|t| t.name)
                .collect();
            for item in &world.loot {
                assert!(table.contains(&item.name.as_str()));
            }
        }
    }

    /// Tests that stale loot is dropped on the next tick, claimed or not
    #[test]
    fn loot_expiry() {
        let mut world = World::with_seed("expiry", &flat_geometry(), 1);
        world.add_player(Player::new("alice", 100.0, 484.0));
        world.spawn_loot(&SMALL_COIN, 100.0, 492.0, 0.0, 0.0);
        world.spawn_loot(&SMALL_COIN, 400.0, 492.0, 0.0, 0.0);
        world.collect_loot("alice");

        for item in &mut world.loot {
            item.spawn_time = world.now_ms - 31_000.0;
        }
        world.step();
        assert!(world.loot.is_empty());
    }

    /// Tests that snapshots report what each player's last frame was
    #[test]
    fn snapshot_acknowledges_inputs() {
        let mut world = World::with_seed("ack", &flat_geometry(), 1);
        world.add_player(Player::new("alice", 100.0, 484.0));
        for tick in 1..=4 {
            world.enqueue_input(
                "alice",
                InputFrame {
                    right: true,
                    ..frame(tick)
                },
            );
        }
        world.step();

        match world.snapshot(0) {
            Packet::GameState {
                tick,
                last_processed_tick,
                players,
                ..
            } => {
                assert_eq!(tick, 1);
                assert_eq!(last_processed_tick["alice"], 4);
                assert_eq!(players[0].x, 108.0);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }
}

/// ROOM AND PERSISTENCE TESTS
mod room_tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("integration-{}-{}.json", name, std::process::id()));
        path
    }

    fn zone(name: &str) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            map: format!("{}.tmj", name),
            monsters: vec![],
            portals: vec![],
        }
    }

    /// Tests that a saved player comes back with identical durable fields
    #[test]
    fn persistence_round_trip() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        {
            let store = Arc::new(JsonAccountStore::open(&path).unwrap());
            store.register("alice", "pw").unwrap();
            let mut room =
                Room::with_geometry(&zone("village"), &flat_geometry(), store.clone(), 1).unwrap();

            room.join(&store.get("alice").unwrap(), Some((321.5, 123.25)));
            {
                let player = room.world.players.get_mut("alice").unwrap();
                player.level = 4;
                player.experience = 400;
                player.strength = 16;
                player.max_health = 130;
                player.inventory.insert("Small Coin".to_string(), 7);
                player.inventory.insert("Large Coin".to_string(), 1);
            }
            assert!(room.leave("alice"));
            store.flush_blocking().unwrap();
        }

        let store = JsonAccountStore::open(&path).unwrap();
        let record = store.get("alice").unwrap();
        let player = Player::from_record(&record, record.last_x.unwrap(), record.last_y.unwrap());

        assert_eq!(record.last_room.as_deref(), Some("village"));
        assert_eq!((player.x, player.y), (321.5, 123.25));
        assert_eq!(player.level, 4);
        assert_eq!(player.experience, 400);
        assert_eq!(player.strength, 16);
        assert_eq!(player.max_health, 130);
        assert_eq!(player.inventory.get("Small Coin"), Some(&7));
        assert_eq!(player.inventory.get("Large Coin"), Some(&1));

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    /// Tests that a rejoin lands at the saved spot in the same room only
    #[test]
    fn rejoin_uses_saved_position() {
        let store = Arc::new(JsonAccountStore::in_memory());
        store.register("alice", "pw").unwrap();
        let mut village =
            Room::with_geometry(&zone("village"), &flat_geometry(), store.clone(), 1).unwrap();
        let mut forest =
            Room::with_geometry(&zone("forest"), &flat_geometry(), store.clone(), 2).unwrap();

        village.join(&store.get("alice").unwrap(), Some((222.0, 333.0)));
        village.leave("alice");

        village.join(&store.get("alice").unwrap(), None);
        assert_eq!(village.world.players["alice"].x, 222.0);
        village.leave("alice");

        forest.join(&store.get("alice").unwrap(), None);
        assert_eq!(
            (forest.world.players["alice"].x, forest.world.players["alice"].y),
            forest.default_spawn()
        );
    }
}

/// SHIPPED MAP TESTS
mod map_tests {
    use super::*;
    use server::geometry::load_geometry;

    fn map_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("maps")
    }

    /// Tests that every built-in zone loads and spawns its minimum population
    #[test]
    fn default_zones_load() {
        let store: Arc<dyn AccountStore> = Arc::new(JsonAccountStore::in_memory());
        for zone in default_zones() {
            let room = Room::create(&zone, &map_dir(), store.clone()).unwrap();
            let minimum: usize = zone.monsters.iter().map(|r| r.min_spawned).sum();
            assert_eq!(room.world.monsters.len(), minimum);
            assert!(!room.world.spawn_points.is_empty());
            assert!(room.world.obstacles.iter().any(|o| o.is_one_way_platform));
        }
    }

    /// Tests that every portal has a floor a player can stand on inside it
    #[test]
    fn portals_have_footing() {
        for zone in default_zones() {
            let geometry = load_geometry(&map_dir().join(&zone.map)).unwrap();
            for portal in &zone.portals {
                let footing = geometry.colliders.iter().any(|c| {
                    let top = c.y - c.height / 2.0;
                    let standing_y = top - 16.0;
                    (c.x - portal.x).abs() <= c.width / 2.0
                        && (standing_y - portal.y).abs() <= portal.height / 2.0
                });
                assert!(footing, "portal {} in {} has no floor", portal.id, zone.name);
            }
        }
    }

    /// Tests that players settle on the ground of every map
    #[test]
    fn players_settle_on_every_map() {
        for zone in default_zones() {
            let geometry = load_geometry(&map_dir().join(&zone.map)).unwrap();
            let mut world = World::with_seed(&zone.name, &geometry, 1);
            let (x, y) = (geometry.width * 0.8, geometry.height * 0.3);
            world.add_player(Player::new("alice", x, y));

            for _ in 0..300 {
                world.step();
            }
            let player = &world.players["alice"];
            assert_eq!(player.velocity_y, 0.0);
            assert!(player.y < geometry.height);
        }
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::task::JoinHandle;

    struct Running {
        addr: SocketAddr,
        shutdown: UnboundedSender<ServerMessage>,
        task: JoinHandle<server::error::Result<()>>,
        store: Arc<JsonAccountStore>,
    }

    impl Running {
        async fn stop(self) {
            self.shutdown.send(ServerMessage::Shutdown).unwrap();
            self.task.await.unwrap().unwrap();
        }
    }

    async fn start_server(max_clients: usize) -> Running {
        let store = Arc::new(JsonAccountStore::in_memory());
        let map_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("maps");
        let rooms = default_zones()
            .iter()
            .map(|zone| Room::create(zone, &map_dir, store.clone()).unwrap())
            .collect();

        let mut server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(16),
            max_clients,
            rooms,
            store.clone(),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move { server.run().await });

        Running {
            addr,
            shutdown,
            task,
            store,
        }
    }

    async fn send(socket: &UdpSocket, to: SocketAddr, packet: &Packet) {
        let data = serialize(packet).unwrap();
        socket.send_to(&data, to).await.unwrap();
    }

    /// Receives until `matches` accepts a packet, skipping everything else.
    async fn expect<F>(socket: &UdpSocket, mut matches: F) -> Packet
    where
        F: FnMut(&Packet) -> bool,
    {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let (len, _) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
                .await
                .expect("timed out waiting for packet")
                .unwrap();
            let packet: Packet = deserialize(&buf[..len]).unwrap();
            if matches(&packet) {
                return packet;
            }
        }
    }

    fn join(username: &str, password: &str, room: Option<&str>) -> Packet {
        Packet::Join {
            client_version: PROTOCOL_VERSION,
            username: username.to_string(),
            password: password.to_string(),
            room: room.map(str::to_string),
        }
    }

    /// Tests register, join, input acknowledgement and save-on-leave
    #[tokio::test]
    async fn session_lifecycle() {
        let server = start_server(8).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(
            &client,
            server.addr,
            &Packet::Register {
                username: "alice".to_string(),
                password: "pw".to_string(),
            },
        )
        .await;
        expect(&client, |p| matches!(p, Packet::Registered { .. })).await;

        send(&client, server.addr, &join("alice", "pw", None)).await;
        let joined = expect(&client, |p| matches!(p, Packet::Joined { .. })).await;
        match joined {
            Packet::Joined {
                room, obstacles, ..
            } => {
                assert_eq!(room, "village");
                assert!(!obstacles.is_empty());
            }
            _ => unreachable!(),
        }

        for tick in 1..=5 {
            send(
                &client,
                server.addr,
                &Packet::Input(InputFrame {
                    right: true,
                    tick,
                    // Ignored: the session decides whose input this is.
                    username: "mallory".to_string(),
                    ..Default::default()
                }),
            )
            .await;
        }
        expect(&client, |p| match p {
            Packet::GameState {
                last_processed_tick,
                ..
            } => last_processed_tick.get("alice") == Some(&5),
            _ => false,
        })
        .await;

        send(
            &client,
            server.addr,
            &Packet::Chat {
                text: "hello".to_string(),
            },
        )
        .await;
        expect(&client, |p| {
            matches!(p, Packet::ChatMessage { sender, text } if sender == "alice" && text == "hello")
        })
        .await;

        send(&client, server.addr, &Packet::Leave).await;
        let mut saved = false;
        for _ in 0..100 {
            if server.store.get("alice").and_then(|r| r.last_room).as_deref() == Some("village") {
                saved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(saved);

        server.stop().await;
    }

    /// Tests that bad logins are refused
    #[tokio::test]
    async fn join_rejections() {
        let server = start_server(8).await;
        server.store.register("alice", "pw").unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(&client, server.addr, &join("alice", "wrong", None)).await;
        expect(&client, |p| matches!(p, Packet::Rejected { .. })).await;

        send(&client, server.addr, &join("", "", None)).await;
        expect(&client, |p| matches!(p, Packet::Rejected { .. })).await;

        send(&client, server.addr, &join("alice", "pw", Some("moon"))).await;
        expect(&client, |p| matches!(p, Packet::Rejected { reason } if reason.contains("moon"))).await;

        send(
            &client,
            server.addr,
            &Packet::Join {
                client_version: PROTOCOL_VERSION + 1,
                username: "alice".to_string(),
                password: "pw".to_string(),
                room: None,
            },
        )
        .await;
        expect(&client, |p| matches!(p, Packet::Rejected { .. })).await;

        server.stop().await;
    }

    /// Tests that a full server turns new players away
    #[tokio::test]
    async fn capacity_limit() {
        let server = start_server(1).await;
        server.store.register("alice", "pw").unwrap();
        server.store.register("bob", "pw").unwrap();

        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&first, server.addr, &join("alice", "pw", None)).await;
        expect(&first, |p| matches!(p, Packet::Joined { .. })).await;

        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&second, server.addr, &join("bob", "pw", None)).await;
        expect(&second, |p| matches!(p, Packet::Rejected { reason } if reason == "Server full")).await;

        server.stop().await;
    }

    /// Tests walking through a portal into the next zone
    #[tokio::test]
    async fn portal_transfer() {
        let server = start_server(8).await;
        let portal = default_zones()[0].portals[0].clone();
        server.store.register("alice", "pw").unwrap();
        server.store.update(
            "alice",
            server::persistence::AccountUpdate {
                last_room: Some("village".to_string()),
                last_x: Some(portal.x),
                last_y: Some(portal.y),
                ..Default::default()
            },
        );

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&client, server.addr, &join("alice", "pw", None)).await;
        expect(&client, |p| matches!(p, Packet::Joined { room, .. } if room == "village")).await;

        send(
            &client,
            server.addr,
            &Packet::EnterPortal {
                portal_id: portal.id.clone(),
            },
        )
        .await;
        expect(&client, |p| matches!(p, Packet::Joined { room, .. } if *room == portal.target_room))
            .await;

        let record = server.store.get("alice").unwrap();
        assert_eq!(record.last_room.as_deref(), Some(portal.target_room.as_str()));
        assert_eq!(record.last_x, Some(portal.target_x));

        server.stop().await;
    }
}
