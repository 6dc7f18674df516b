//! Operator test tool for the WFS OSC wire protocol.
//!
//! Drives the real packet path against a running unit:
//!   wfs-cli set /wfs/input/positionX 3 1.5      Send one parameter update
//!   wfs-cli ping                                 Probe a unit and await the pong
//!   wfs-cli find --password wfs                  Discover units on the LAN
//!   wfs-cli monitor --port 9000                  Print decoded OSC arriving on a port
//!   wfs-cli flood --count 1000 --rate 500        Hammer one key to exercise coalescing

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::net::UdpSocket;

use wfs_protocol::codec::{decode_packet, encode_message, OscMessage, OscPacket, OscValue};
use wfs_protocol::remote;

#[derive(Parser, Debug)]
#[command(name = "wfs-cli", about = "WFS OSC wire protocol test tool")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Unit address
    #[arg(short, long, default_value = "127.0.0.1:8000", global = true)]
    unit: SocketAddr,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a single OSC message: ADDRESS [CHANNEL] VALUE
    Set {
        address: String,
        /// Arguments, ints or floats, in order
        args: Vec<String>,
    },
    /// Send a remote-protocol ping and wait for the pong
    Ping {
        #[arg(short, long, default_value = "2000")]
        timeout_ms: u64,
    },
    /// Broadcast /findDevice and list replies
    Find {
        #[arg(short, long, default_value = "")]
        password: String,
        #[arg(short, long, default_value = "2000")]
        wait_ms: u64,
    },
    /// Print every decoded OSC packet arriving on a local port
    Monitor {
        #[arg(short, long, default_value = "9000")]
        port: u16,
    },
    /// Send many updates for one coalescing key as fast as requested
    Flood {
        #[arg(short, long, default_value = "1000")]
        count: u64,
        /// Messages per second
        #[arg(short, long, default_value = "500")]
        rate: u64,
        #[arg(long, default_value = "0")]
        channel: i32,
    },
}

fn parse_args(raw: &[String]) -> anyhow::Result<Vec<OscValue>> {
    raw.iter()
        .map(|token| {
            if let Ok(i) = token.parse::<i32>() {
                Ok(OscValue::Int(i))
            } else if let Ok(f) = token.parse::<f32>() {
                Ok(OscValue::Float(f))
            } else {
                anyhow::bail!("argument `{token}` is neither int nor float")
            }
        })
        .collect()
}

fn print_packet(packet: &OscPacket, from: SocketAddr) {
    match packet {
        OscPacket::Message(msg) => {
            println!("{from}  {}  {:?}", msg.addr, msg.args);
        }
        OscPacket::Bundle(bundle) => {
            println!("{from}  #bundle({})", bundle.content.len());
            for element in &bundle.content {
                print_packet(element, from);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    match args.command {
        Commands::Set { address, args: raw } => {
            let msg = OscMessage::new(address, parse_args(&raw)?);
            socket.send_to(&encode_message(&msg), args.unit).await?;
            println!("sent {} to {}", msg.addr, args.unit);
        }

        Commands::Ping { timeout_ms } => {
            // The unit answers /remoteInput/ping with /remoteOutput/pong
            let msg = OscMessage::new(remote::ADDR_IN_PING, vec![OscValue::Int(1)]);
            let started = Instant::now();
            socket.send_to(&encode_message(&msg), args.unit).await?;

            let mut buf = [0u8; 1500];
            let result = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                socket.recv_from(&mut buf),
            )
            .await;
            match result {
                Ok(Ok((len, from))) => {
                    if let Ok(OscPacket::Message(reply)) = decode_packet(&buf[..len]) {
                        println!(
                            "{} from {} in {:.1} ms",
                            reply.addr,
                            from,
                            started.elapsed().as_secs_f64() * 1000.0
                        );
                    }
                }
                Ok(Err(e)) => anyhow::bail!("receive failed: {e}"),
                Err(_) => anyhow::bail!("no pong within {timeout_ms} ms"),
            }
        }

        Commands::Find { password, wait_ms } => {
            let msg = OscMessage::new(
                remote::ADDR_FIND_DEVICE,
                vec![OscValue::Str(password)],
            );
            socket.set_broadcast(true)?;
            socket.send_to(&encode_message(&msg), args.unit).await?;

            let deadline = Instant::now() + Duration::from_millis(wait_ms);
            let mut buf = [0u8; 1500];
            let mut found = 0u32;
            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                let Ok(Ok((len, from))) =
                    tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await
                else {
                    break;
                };
                if let Ok(OscPacket::Message(reply)) = decode_packet(&buf[..len]) {
                    if reply.addr == remote::ADDR_DEVICE_FOUND {
                        println!("{from}  {:?}", reply.args);
                        found += 1;
                    }
                }
            }
            println!("{found} unit(s) answered");
        }

        Commands::Monitor { port } => {
            let listener = UdpSocket::bind(("0.0.0.0", port)).await?;
            println!("listening on {port}, ctrl-c to stop");
            let mut buf = [0u8; 65536];
            loop {
                let (len, from) = listener.recv_from(&mut buf).await?;
                match decode_packet(&buf[..len]) {
                    Ok(packet) => print_packet(&packet, from),
                    Err(e) => println!("{from}  <undecodable: {e}>"),
                }
            }
        }

        Commands::Flood { count, rate, channel } => {
            let interval = Duration::from_secs_f64(1.0 / rate.max(1) as f64);
            let started = Instant::now();
            for i in 0..count {
                let msg = OscMessage::new(
                    "/wfs/input/positionX",
                    vec![OscValue::Int(channel), OscValue::Float(i as f32 * 0.01)],
                );
                socket.send_to(&encode_message(&msg), args.unit).await?;
                tokio::time::sleep(interval).await;
            }
            let elapsed = started.elapsed().as_secs_f64();
            println!(
                "sent {count} updates in {elapsed:.2} s ({:.0} msg/s)",
                count as f64 / elapsed
            );
        }
    }

    Ok(())
}
