// CodeCollab CLI Validation Tool
// Drives a running server over its WebSocket and HTTP surfaces: join rooms,
// push edits, post remarks, run code, and execute automated validation
// scenarios.

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Parser)]
#[command(name = "codecollab-cli")]
#[command(about = "CodeCollab Server CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Join a room and watch events until Ctrl+C
    Join {
        /// Room ID to join
        #[arg(short, long)]
        room_id: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Role: Admin, Developer or Tester
        #[arg(long, default_value = "Developer")]
        role: String,
    },

    /// Join a room and push a code change
    SendCode {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        name: String,

        /// Code to set as the room buffer
        #[arg(short, long)]
        code: String,
    },

    /// Post a remark to a room
    SendRemark {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        text: String,
    },

    /// Fetch a room's remark log
    Remarks {
        #[arg(short, long)]
        room_id: String,
    },

    /// Run code through the execution gateway
    Run {
        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        code: String,

        /// Input fed to the program's stdin
        #[arg(long, default_value = "")]
        stdin: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation scenarios
        #[arg(short, long)]
        all: bool,

        /// Run a specific scenario
        #[arg(long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Join { room_id, name, role } => {
            join_and_watch(&cli.server, room_id, name, role).await;
        }
        Commands::SendCode { room_id, name, code } => {
            send_code(&cli.server, room_id, name, code).await;
        }
        Commands::SendRemark { room_id, name, text } => {
            send_remark(&cli.server, room_id, name, text).await;
        }
        Commands::Remarks { room_id } => fetch_remarks(&cli.server, room_id).await,
        Commands::Run {
            language,
            code,
            stdin,
        } => run_code(&cli.server, language, code, stdin).await,
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_scenarios(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => match resp.json::<Value>().await {
            Ok(body) => {
                println!("{} Configuration:", "✓".green());
                println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            }
            Err(e) => println!("{} Failed to parse config: {}", "✗".red(), e),
        },
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn connect(server: &str) -> Option<(WsWriter, WsReader)> {
    let url = format!("ws://{}/ws", server);
    match connect_async(&url).await {
        Ok((stream, _)) => {
            let (write, read) = stream.split();
            Some((write, read))
        }
        Err(e) => {
            println!("{} Cannot connect to {}: {}", "✗".red(), url, e);
            None
        }
    }
}

async fn send_event(write: &mut WsWriter, event: Value) -> bool {
    if let Err(e) = write.send(Message::Text(event.to_string())).await {
        println!("{} Failed to send event: {}", "✗".red(), e);
        return false;
    }
    true
}

async fn next_event(read: &mut WsReader, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return serde_json::from_str(&text).ok();
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

fn join_event(room_id: &str, name: &str, role: &str) -> Value {
    json!({
        "type": "join",
        "roomId": room_id,
        "userName": name,
        "role": role
    })
}

async fn join_and_watch(server: &str, room_id: &str, name: &str, role: &str) {
    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    if !send_event(&mut write, join_event(room_id, name, role)).await {
        return;
    }

    match next_event(&mut read, Duration::from_secs(2)).await {
        Some(snapshot) if snapshot["type"] == "roomSnapshot" => {
            println!("{} Joined room {}", "✓".green(), room_id.bold());
            println!("  Language: {}", snapshot["language"].as_str().unwrap_or("?"));
            println!("  Users: {}", snapshot["users"]);
        }
        _ => {
            println!("{} Did not receive room snapshot", "✗".red());
            return;
        }
    }

    println!("{}", "Watching room events (Ctrl+C to exit)...".cyan());
    while let Some(event) = next_event(&mut read, Duration::from_secs(3600)).await {
        let kind = event["type"].as_str().unwrap_or("?").to_string();
        match kind.as_str() {
            "codeUpdate" => println!("{} code update:\n{}", "▸".blue(), event["code"].as_str().unwrap_or("")),
            "languageUpdate" => println!("{} language: {}", "▸".blue(), event["language"]),
            "userJoined" => println!("{} users: {}", "▸".blue(), event["users"]),
            "userLeft" => println!("{} users: {}", "▸".blue(), event["users"]),
            "userTyping" => println!("{} {}", "▸".blue(), event["label"].as_str().unwrap_or("")),
            "typingCleared" => println!("{} {} stopped typing", "▸".blue(), event["user"]),
            "remark:update" => println!(
                "{} {}: {}",
                "▸".blue(),
                event["userName"].as_str().unwrap_or("?"),
                event["text"].as_str().unwrap_or("")
            ),
            _ => println!("{} {}", "▸".blue(), event),
        }
    }
}

async fn send_code(server: &str, room_id: &str, name: &str, code: &str) {
    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    if !send_event(&mut write, join_event(room_id, name, "Developer")).await {
        return;
    }
    if next_event(&mut read, Duration::from_secs(2)).await.is_none() {
        println!("{} Did not receive room snapshot", "✗".red());
        return;
    }

    let event = json!({
        "type": "codeChange",
        "roomId": room_id,
        "code": code
    });
    if send_event(&mut write, event).await {
        // Give the relay a beat before dropping the socket
        sleep(Duration::from_millis(200)).await;
        println!("{} Code pushed to room {}", "✓".green(), room_id.bold());
    }
}

async fn send_remark(server: &str, room_id: &str, name: &str, text: &str) {
    let url = format!("http://{}/api/remarks", server);
    let client = reqwest::Client::new();

    let body = json!({
        "roomId": room_id,
        "userName": name,
        "text": text
    });

    match client.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Remark stored", "✓".green());
        }
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            println!("{} Remark rejected ({}): {}", "✗".red(), status, body);
        }
        Err(e) => println!("{} Cannot reach server: {}", "✗".red(), e),
    }
}

async fn fetch_remarks(server: &str, room_id: &str) {
    let url = format!(
        "http://{}/api/remarks/{}",
        server,
        urlencoding::encode(room_id)
    );
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => match resp.json::<Vec<Value>>().await {
            Ok(remarks) => {
                println!("{} {} remark(s):", "✓".green(), remarks.len());
                for remark in remarks {
                    println!(
                        "  {}: {}",
                        remark["userName"].as_str().unwrap_or("?").bold(),
                        remark["text"].as_str().unwrap_or("")
                    );
                }
            }
            Err(e) => println!("{} Failed to parse remark log: {}", "✗".red(), e),
        },
        Err(e) => println!("{} Cannot reach server: {}", "✗".red(), e),
    }
}

async fn run_code(server: &str, language: &str, code: &str, stdin: &str) {
    println!("{}", "Running code...".cyan());

    let url = format!("http://{}/compile", server);
    let client = reqwest::Client::new();

    let body = json!({
        "language": language,
        "code": code,
        "stdin": stdin
    });

    match client.post(&url).json(&body).send().await {
        Ok(resp) => match resp.json::<Value>().await {
            Ok(outcome) => {
                if let Some(error) = outcome.get("error").and_then(|e| e.as_str()) {
                    println!("{} Execution error: {}", "✗".red(), error);
                } else {
                    println!("{} Execution finished", "✓".green());
                    println!("  Status: {}", outcome["status"].as_str().unwrap_or("?"));
                    println!(
                        "  Time: {}s | Memory: {} KB",
                        outcome["time"], outcome["memory"]
                    );
                    println!("{}", outcome["output"].as_str().unwrap_or(""));
                }
            }
            Err(e) => println!("{} Failed to parse outcome: {}", "✗".red(), e),
        },
        Err(e) => println!("{} Cannot reach server: {}", "✗".red(), e),
    }
}

fn list_scenarios() {
    println!("Available scenarios:");
    println!("  presence     - join/leave presence list propagation");
    println!("  code-sync    - last-writer-wins code propagation");
    println!("  no-self-echo - originator receives no echo of its events");
    println!("  typing       - typing indicator relay and expiry");
}

async fn run_all_scenarios(server: &str) {
    let scenarios = ["presence", "code-sync", "no-self-echo", "typing"];
    for scenario in scenarios {
        run_scenario(server, scenario).await;
        sleep(Duration::from_millis(200)).await;
    }
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Scenario:".bold(), scenario.cyan());
    let passed = match scenario {
        "presence" => scenario_presence(server).await,
        "code-sync" => scenario_code_sync(server).await,
        "no-self-echo" => scenario_no_self_echo(server).await,
        "typing" => scenario_typing(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    if passed {
        println!("{} {} passed", "✓".green(), scenario);
    } else {
        println!("{} {} failed", "✗".red(), scenario);
    }
}

async fn scenario_presence(server: &str) -> bool {
    let room = format!("cli-presence-{}", std::process::id());

    let Some((mut write_a, mut read_a)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_a, join_event(&room, "alpha", "Developer")).await;
    if next_event(&mut read_a, Duration::from_secs(2)).await.is_none() {
        return false;
    }

    let Some((mut write_b, mut read_b)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_b, join_event(&room, "beta", "Tester")).await;

    let Some(snapshot) = next_event(&mut read_b, Duration::from_secs(2)).await else {
        return false;
    };
    let users = snapshot["users"].to_string();
    if !(users.contains("alpha") && users.contains("beta")) {
        println!("  snapshot users: {}", users);
        return false;
    }

    let Some(joined) = next_event(&mut read_a, Duration::from_secs(2)).await else {
        return false;
    };
    joined["type"] == "userJoined" && joined["users"].to_string().contains("beta")
}

async fn scenario_code_sync(server: &str) -> bool {
    let room = format!("cli-codesync-{}", std::process::id());

    let Some((mut write_a, mut read_a)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_a, join_event(&room, "alpha", "Developer")).await;
    next_event(&mut read_a, Duration::from_secs(2)).await;

    let Some((mut write_b, mut read_b)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_b, join_event(&room, "beta", "Developer")).await;
    next_event(&mut read_b, Duration::from_secs(2)).await;
    next_event(&mut read_a, Duration::from_secs(2)).await; // userJoined

    // Two writes; the later one must win everywhere
    send_event(
        &mut write_a,
        json!({"type": "codeChange", "roomId": room, "code": "first"}),
    )
    .await;
    send_event(
        &mut write_a,
        json!({"type": "codeChange", "roomId": room, "code": "second"}),
    )
    .await;

    let mut last_seen = String::new();
    while let Some(event) = next_event(&mut read_b, Duration::from_millis(800)).await {
        if event["type"] == "codeUpdate" {
            last_seen = event["code"].as_str().unwrap_or("").to_string();
        }
    }
    if last_seen != "second" {
        println!("  expected peer to end on 'second', got '{}'", last_seen);
        return false;
    }

    // A late joiner's snapshot carries the winning write
    let Some((mut write_c, mut read_c)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_c, join_event(&room, "gamma", "Tester")).await;
    let Some(snapshot) = next_event(&mut read_c, Duration::from_secs(2)).await else {
        return false;
    };
    snapshot["code"] == "second"
}

async fn scenario_no_self_echo(server: &str) -> bool {
    let room = format!("cli-echo-{}", std::process::id());

    let Some((mut write_a, mut read_a)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_a, join_event(&room, "alpha", "Developer")).await;
    next_event(&mut read_a, Duration::from_secs(2)).await;

    send_event(
        &mut write_a,
        json!({"type": "codeChange", "roomId": room, "code": "solo"}),
    )
    .await;

    // The only participant is the originator, so nothing may come back
    match next_event(&mut read_a, Duration::from_millis(800)).await {
        None => true,
        Some(event) => {
            println!("  unexpected echo: {}", event);
            false
        }
    }
}

async fn scenario_typing(server: &str) -> bool {
    let room = format!("cli-typing-{}", std::process::id());

    let Some((mut write_a, mut read_a)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_a, join_event(&room, "alphabetic", "Developer")).await;
    next_event(&mut read_a, Duration::from_secs(2)).await;

    let Some((mut write_b, mut read_b)) = connect(server).await else {
        return false;
    };
    send_event(&mut write_b, join_event(&room, "beta", "Tester")).await;
    next_event(&mut read_b, Duration::from_secs(2)).await;
    next_event(&mut read_a, Duration::from_secs(2)).await; // userJoined

    send_event(
        &mut write_a,
        json!({"type": "typing", "roomId": room, "userName": "alphabetic"}),
    )
    .await;

    let Some(typing) = next_event(&mut read_b, Duration::from_secs(2)).await else {
        return false;
    };
    if typing["type"] != "userTyping" || typing["label"] != "alphabet... is Typing" {
        println!("  unexpected typing event: {}", typing);
        return false;
    }

    // Cleared after the 2s quiet window
    let Some(cleared) = next_event(&mut read_b, Duration::from_secs(4)).await else {
        println!("  no typingCleared within window");
        return false;
    };
    cleared["type"] == "typingCleared" && cleared["user"] == "alphabetic"
}
