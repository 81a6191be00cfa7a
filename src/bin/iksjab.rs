/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use iksjab::Connection;
use iksjab::ConnectionEvent;
use iksjab::ConnectionString;
use iksjab::Jid;
use tracing_subscriber::EnvFilter;

fn print_version() {
    println!("iksjab (iksemel) v{}", iksjab::VERSION);
}

fn print_usage() {
    println!(concat!(
        "Usage: iksjab [OPTIONS]\n",
        "This tool can communicate over XMPP.\n",
        "Options:\n",
        "  -c, --connect <STRING> Connection string, e.g. 'user id=a@b; tls=required'\n",
        "  -j, --jid <JID>        Jabber ID, shortcut for a minimal connection string\n",
        "  -s, --send <XML>       Send the given XML after logging in\n",
        "  -d, --debug            Print the protocol trace\n",
        "  -h, --help             Display this help message and exit\n",
        "  -v, --version          Display the version and exit\n",
        "Report issues at https://github.com/meduketto/iksemel-rust/issues"
    ));
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("iksjab=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(mut config: ConnectionString, outgoing: Vec<String>) -> Result<(), iksjab::XmppError> {
    if !config.has_password() {
        let password = rpassword::prompt_password(format!("Password for {}: ", config.jid()))?;
        config = config.password(&password);
    }

    let connection = Connection::new();
    let events = connection.subscribe();
    connection.open(&config)?;
    if let Some(jid) = connection.bound_jid() {
        eprintln!("Logged in as {jid}");
    }
    for xml in &outgoing {
        connection.send_raw(xml)?;
    }

    loop {
        connection.poll()?;
        let Some(event) = events.next_event(Duration::from_secs(1)) else {
            continue;
        };
        match event {
            ConnectionEvent::MessageReceived(stanza) => println!("{stanza}"),
            ConnectionEvent::StreamClosed(reason) => {
                eprintln!("Stream closed by the server {reason}");
                break;
            }
            ConnectionEvent::TransportFailed(reason) => {
                eprintln!("Connection lost: {reason}");
                break;
            }
            _ => {}
        }
    }
    connection.close();
    Ok(())
}

fn main() -> ExitCode {
    let mut args = env::args();
    let mut config: Option<ConnectionString> = None;
    let mut outgoing = Vec::new();
    let mut debug = false;

    // Skip the first argument (program name)
    args.next();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--connect" => {
                let Some(value) = args.next() else {
                    eprintln!("Error: connection string expected after {arg}");
                    return ExitCode::FAILURE;
                };
                config = match value.parse::<ConnectionString>() {
                    Ok(config) => Some(config),
                    Err(err) => {
                        eprintln!("Error: {err}");
                        return ExitCode::FAILURE;
                    }
                };
            }
            "-j" | "--jid" => {
                let Some(value) = args.next() else {
                    eprintln!("Error: Jabber ID expected after {arg}");
                    return ExitCode::FAILURE;
                };
                config = match Jid::new(&value) {
                    Ok(jid) => Some(ConnectionString::new(jid, "")),
                    Err(err) => {
                        eprintln!("Error: {err}");
                        return ExitCode::FAILURE;
                    }
                };
            }
            "-s" | "--send" => {
                let Some(value) = args.next() else {
                    eprintln!("Error: XML expected after {arg}");
                    return ExitCode::FAILURE;
                };
                outgoing.push(value);
            }
            "-d" | "--debug" => debug = true,
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "-v" | "--version" => {
                print_version();
                return ExitCode::SUCCESS;
            }
            _ => {
                eprintln!("Error: unknown option {arg}");
                return ExitCode::FAILURE;
            }
        }
    }

    let Some(config) = config else {
        print_usage();
        return ExitCode::FAILURE;
    };
    init_tracing(debug);

    match run(config, outgoing) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
