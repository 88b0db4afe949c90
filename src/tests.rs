use super::*;
use std::fs::write;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use tempfile::{tempdir, TempDir};

const TWO_MESSAGES: &str = "MSH|^~\\&|SendingApp|SendingFac|ReceivingApp|ReceivingFac|20250101123000||ADT^A01|MSG001|P|2.3\n\
                            PID|1||123456^^^MRN||DOE^JOHN||19800101|M\n\
                            MSH|^~\\&|SendingApp|SendingFac|ReceivingApp|ReceivingFac|20250101123100||ADT^A08|MSG002|P|2.3\n\
                            PID|1||654321^^^MRN||ROE^JANE||19900202|F\n";

/// Mock MLLP listener that acknowledges every message with `AA`
struct MockTcpServer {
    listener: TcpListener,
}

impl MockTcpServer {
    fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        Self { listener }
    }

    fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Answers `connections` requests, returning what was received
    fn serve(self, connections: usize) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut received = Vec::new();
            for _ in 0..connections {
                let (mut stream, _) = self.listener.accept().unwrap();
                received.push(Self::handle_connection(&mut stream));
            }
            received
        })
    }

    fn handle_connection(stream: &mut TcpStream) -> String {
        let mut request = Vec::new();
        let mut buffer = [0; 1024];
        while !request.ends_with(b"\x1C\x0D") {
            match stream.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buffer[..n]),
            }
        }
        let message = String::from_utf8_lossy(&request).trim_matches(|c: char| c == '\x0B' || c == '\x1C' || c == '\r').to_string();
        let control_id = message.split('|').nth(9).unwrap_or("").to_string();
        let ack = format!("\x0BMSH|^~\\&|ReceivingApp|ReceivingFac|SendingApp|SendingFac|20250101123001||ACK|A1|P|2.3\rMSA|AA|{}\r\x1C\x0D", control_id);
        stream.write_all(ack.as_bytes()).unwrap();
        message
    }
}

struct TestFiles {
    message: PathBuf,
    config: PathBuf,
    _dir: TempDir,
}

fn create_test_files(content: &str) -> TestFiles {
    let dir = tempdir().unwrap();
    let message = dir.path().join("test.hl7");
    write(&message, content).unwrap();
    TestFiles {
        message,
        config: dir.path().join("config.json"),
        _dir: dir,
    }
}

fn cli(files: &TestFiles, args: &[&str]) -> Cli {
    let mut argv = vec![
        "hl7-mllp-tester".to_string(),
        "--config".to_string(),
        files.config.to_str().unwrap().to_string(),
    ];
    argv.extend(args.iter().map(|a| a.to_string()));
    Cli::try_parse_from(argv).unwrap()
}

fn run_captured(cli: Cli) -> (Result<(), String>, String) {
    let mut out = Vec::new();
    let result = run(cli, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_run_send_success() {
    let server = MockTcpServer::new();
    let port = server.port().to_string();
    let handle = server.serve(2);

    let files = create_test_files(TWO_MESSAGES);
    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(
        &files,
        &["send", "-H", "127.0.0.1", "-p", port.as_str(), "-m", message],
    ));

    assert!(result.is_ok(), "{:?}", result);
    assert!(output.contains("Sending 2 message(s) x 1"));
    assert!(output.contains("MSA|AA|MSG001"));
    assert!(output.contains("MSA|AA|MSG002"));
    assert!(output.contains("Attempts: 2"));

    let received = handle.join().unwrap();
    assert!(received[0].ends_with("PID|1||123456^^^MRN||DOE^JOHN||19800101|M"));
    assert!(received[1].contains("|MSG002|"));
}

#[test]
fn test_run_send_repeats_with_generated_ids() {
    let server = MockTcpServer::new();
    let port = server.port().to_string();
    let handle = server.serve(3);

    let files = create_test_files(TWO_MESSAGES.lines().take(2).collect::<Vec<_>>().join("\n").as_str());
    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(
        &files,
        &["send", "-H", "127.0.0.1", "-p", port.as_str(), "-m", message, "-r", "3", "-g"],
    ));

    assert!(result.is_ok(), "{:?}", result);
    let received = handle.join().unwrap();
    assert_eq!(received.len(), 3);
    for sent in &received {
        assert!(!sent.contains("|MSG001|"));
        let id = sent.split('|').nth(9).unwrap();
        assert_eq!(id.len(), 20);
        assert!(output.contains(&format!("MSA|AA|{}", id)));
    }
}

#[test]
fn test_run_send_connection_refused() {
    let port = {
        let server = MockTcpServer::new();
        server.port()
    }
    .to_string();

    let files = create_test_files(TWO_MESSAGES);
    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(
        &files,
        &["send", "-H", "127.0.0.1", "-p", port.as_str(), "-m", message, "-t", "2"],
    ));

    let error = result.unwrap_err();
    assert!(error.contains("message 1, attempt 1"), "{}", error);
    assert!(output.contains("Attempts: 0"));
    assert!(output.contains("Error: message 1, attempt 1"));
}

#[test]
fn test_run_send_simulated_needs_no_server() {
    let files = create_test_files("MSH|^~\\&|A|B|C|D|20250101000000||ADT^A01|ID1|P|2.3");
    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(
        &files,
        &["send", "-p", "1", "-m", message, "--simulate"],
    ));

    assert!(result.is_ok(), "{:?}", result);
    assert!(output.contains("simulated ACKs"));
    assert!(output.contains("ACK Status: AA (Application Accept)"));
    assert!(output.contains("  MSA|AA|ID1"));
    assert!(output.contains("ACK^A01"));
}

#[test]
fn test_run_send_json_rounds() {
    let files = create_test_files(TWO_MESSAGES);
    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(
        &files,
        &["send", "-m", message, "-s", "-r", "2", "--rounds", "2", "--json"],
    ));

    assert!(result.is_ok(), "{:?}", result);
    let reports: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["metrics"]["attempts"], 4);
    assert_eq!(reports[1]["summary"][3]["message"], 2);
    assert_eq!(reports[1]["summary"][3]["attempt"], 2);
}

#[test]
fn test_run_send_rounds_prints_history() {
    let files = create_test_files(TWO_MESSAGES);
    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(
        &files,
        &["send", "-m", message, "-s", "--rounds", "3"],
    ));

    assert!(result.is_ok(), "{:?}", result);
    assert!(output.contains("== round 3 =="));
    assert!(output.contains("run 3: 2 attempts"));
    assert!(output.contains("total: 6 attempts"));
}

#[test]
fn test_run_blank_message() {
    let files = create_test_files("  \n\n  ");
    let message = files.message.to_str().unwrap();
    let (result, _) = run_captured(cli(&files, &["send", "-m", message, "-s"]));
    assert_eq!(result.unwrap_err(), "Please provide a valid HL7 message.");
}

#[test]
fn test_run_missing_message_file() {
    let files = create_test_files("");
    let (result, _) = run_captured(cli(
        &files,
        &["send", "-m", "/nonexistent/path/message.hl7"],
    ));
    assert!(result.unwrap_err().contains("Failed to read message file"));
}

#[test]
fn test_save_config_used_by_send() {
    let server = MockTcpServer::new();
    let port = server.port().to_string();
    let handle = server.serve(1);

    let files = create_test_files("MSH|^~\\&|A|B|C|D|20250101000000||ADT^A01|ID1|P|2.3");
    let (result, output) = run_captured(cli(
        &files,
        &["save-config", "-H", "127.0.0.1", "-p", port.as_str()],
    ));
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(output, format!("Saved default HOST=127.0.0.1, PORT={}.\n", port));

    let message = files.message.to_str().unwrap();
    let (result, output) = run_captured(cli(&files, &["send", "-m", message]));
    assert!(result.is_ok(), "{:?}", result);
    assert!(output.contains(&format!("to 127.0.0.1:{}", port)));
    assert_eq!(handle.join().unwrap().len(), 1);
}

#[test]
fn test_invalid_arguments() {
    assert!(Cli::try_parse_from(["hl7-mllp-tester", "send", "-r", "0"]).is_err());
    assert!(Cli::try_parse_from(["hl7-mllp-tester", "send", "--rounds", "0"]).is_err());
    assert!(Cli::try_parse_from(["hl7-mllp-tester", "send", "-t", "0"]).is_err());
    assert!(Cli::try_parse_from(["hl7-mllp-tester", "send", "-t", "1"]).is_ok());
    assert!(Cli::try_parse_from(["hl7-mllp-tester", "send", "-p", "70000"]).is_err());
    assert!(Cli::try_parse_from(["hl7-mllp-tester", "save-config", "-H", "x"]).is_err());
}
