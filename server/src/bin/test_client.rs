use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{InputFrame, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Scripted player that logs in, walks around and swings at things.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    #[arg(short, long, default_value = "bot")]
    username: String,

    #[arg(short, long, default_value = "bot")]
    password: String,

    /// Room to join instead of the saved one
    #[arg(short, long)]
    room: Option<String>,

    /// How long to play, in seconds
    #[arg(short, long, default_value = "10")]
    duration: u64,
}

async fn send(socket: &UdpSocket, server: SocketAddr, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, server).await?;
    Ok(())
}

async fn receive(socket: &UdpSocket, buf: &mut [u8]) -> Option<Packet> {
    match timeout(Duration::from_secs(2), socket.recv_from(buf)).await {
        Ok(Ok((len, _))) => match deserialize::<Packet>(&buf[..len]) {
            Ok(packet) => Some(packet),
            Err(e) => {
                println!("Failed to deserialize packet: {}", e);
                None
            }
        },
        Ok(Err(e)) => {
            println!("Error receiving packet: {}", e);
            None
        }
        Err(_) => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);
    let mut buf = vec![0u8; 65_507];

    // Registering an existing name is rejected, which is fine for a bot.
    send(
        &socket,
        args.server,
        &Packet::Register {
            username: args.username.clone(),
            password: args.password.clone(),
        },
    )
    .await?;
    match receive(&socket, &mut buf).await {
        Some(Packet::Registered { username }) => println!("Registered {}", username),
        Some(Packet::Rejected { reason }) => println!("Register: {}", reason),
        other => println!("Unexpected register reply: {:?}", other),
    }

    send(
        &socket,
        args.server,
        &Packet::Join {
            client_version: PROTOCOL_VERSION,
            username: args.username.clone(),
            password: args.password.clone(),
            room: args.room.clone(),
        },
    )
    .await?;

    loop {
        match receive(&socket, &mut buf).await {
            Some(Packet::Joined {
                room,
                map_width,
                map_height,
                obstacles,
                portals,
                ..
            }) => {
                println!(
                    "Joined {} ({}x{}, {} obstacles, {} portals)",
                    room,
                    map_width,
                    map_height,
                    obstacles.len(),
                    portals.len()
                );
                break;
            }
            Some(Packet::Rejected { reason }) => {
                println!("Join rejected: {}", reason);
                return Ok(());
            }
            Some(_) => continue,
            None => {
                println!("No reply from {}", args.server);
                return Ok(());
            }
        }
    }

    // One frame per 60Hz tick: walk right, then left, jumping and attacking now and then.
    let frames = args.duration * 60;
    for tick in 1..=frames as u32 {
        let going_right = (tick / 120) % 2 == 0;
        let frame = InputFrame {
            left: !going_right,
            right: going_right,
            jump: tick % 90 == 0,
            attack: tick % 45 == 0,
            loot: tick % 30 == 0,
            tick,
            username: args.username.clone(),
            ..Default::default()
        };
        send(&socket, args.server, &Packet::Input(frame)).await?;

        if tick % 60 == 0 {
            send(
                &socket,
                args.server,
                &Packet::Chat {
                    text: format!("tick {}", tick),
                },
            )
            .await?;
        }

        while let Ok(Ok((len, _))) = timeout(Duration::from_millis(1), socket.recv_from(&mut buf)).await {
            match deserialize::<Packet>(&buf[..len]) {
                Ok(Packet::GameState {
                    tick: server_tick,
                    last_processed_tick,
                    players,
                    monsters,
                    loot,
                    ..
                }) => {
                    if server_tick % 30 == 0 {
                        let me = players.iter().find(|p| p.username == args.username);
                        println!(
                            "Tick {} (acked {:?}): {} players, {} monsters, {} loot, me at {:?}",
                            server_tick,
                            last_processed_tick.get(&args.username),
                            players.len(),
                            monsters.len(),
                            loot.len(),
                            me.map(|p| (p.x, p.y, p.current_health, p.level))
                        );
                    }
                }
                Ok(Packet::MonsterTookDamage {
                    monster_id,
                    damage,
                    critical,
                }) => println!(
                    "Monster {} took {}{}",
                    monster_id,
                    damage,
                    if critical { " (critical)" } else { "" }
                ),
                Ok(other) => println!("Received: {:?}", other),
                Err(e) => println!("Failed to deserialize packet: {}", e),
            }
        }

        sleep(Duration::from_millis(16)).await;
    }

    send(&socket, args.server, &Packet::Leave).await?;
    println!("Test client finished");
    Ok(())
}
