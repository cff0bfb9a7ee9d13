//! CLI subcommands. Each one is a single worker event against the persistent store.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::net::{Network, Request};
use crate::worker::{
  ContactSubmission, FetchDecision, LogNotifier, OfflineWorker, Registration, RegistrationEvent,
};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Install this cache version and activate it
  Install,
  /// Delete cache namespaces that do not belong to this version
  Activate,
  /// Run one request through the fetch intercept
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    /// Accept header sent with the request
    #[arg(long, default_value = "text/html")]
    accept: String,
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Queue a contact form submission for the next sync
  Enqueue {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    message: String,
  },
  /// Fire a background-sync event (defaults to the contact form tag)
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// Deliver a push message payload (JSON with title and body)
  Push {
    payload: Option<String>,
    /// Also click the notification once shown
    #[arg(long)]
    click: bool,
  },
  /// List cache namespaces with their entry counts
  Caches,
}

pub async fn run<S: CacheStorage, N: Network>(
  command: Command,
  config: &Config,
  caches: CacheLayer<S>,
  network: Arc<N>,
) -> Result<()> {
  match command {
    Command::Install => install(config, caches, network).await,
    Command::Activate => {
      // Only a committed install may purge the generation in control
      let worker = OfflineWorker::resume(config, caches, network)?;
      let report = worker.collect_stale_caches();
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      for name in &report.failed {
        println!("could not delete {}", name);
      }
      Ok(())
    }
    Command::Fetch {
      url,
      accept,
      method,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = Request::new(method, config.resolve(&url)?).with_header("Accept", accept);

      let worker = OfflineWorker::resume(config, caches, Arc::clone(&network))?;
      match worker.handle_fetch(&request).await? {
        FetchDecision::Respond(result) => {
          println!(
            "{} {} ({:?})",
            result.data.status, result.data.status_text, result.source
          );
          println!("{}", result.data.text());
        }
        FetchDecision::Passthrough => {
          let response = network.fetch(&request).await?;
          println!("{} {} (passthrough)", response.status, response.status_text);
          println!("{}", response.text());
        }
      }
      Ok(())
    }
    Command::Enqueue {
      name,
      email,
      message,
    } => {
      let worker = OfflineWorker::new(config, caches, network)?;
      let request = worker.queue_submission(&ContactSubmission {
        name,
        email,
        message,
      })?;
      println!("queued {} {}", request.method, request.url);
      Ok(())
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
      let worker = OfflineWorker::resume(config, caches, network)?;
      match worker.handle_sync(&tag).await {
        Some(report) => println!(
          "sent {}, still queued {}",
          report.sent.len(),
          report.retained.len()
        ),
        None => println!("tag '{}' ignored", tag),
      }
      Ok(())
    }
    Command::Push { payload, click } => {
      let worker = OfflineWorker::resume(config, caches, network)?;
      let notifier = LogNotifier;
      let shown = worker.handle_push(payload.as_deref().map(str::as_bytes), &notifier)?;
      match shown {
        Some(notification) => {
          println!("{}: {}", notification.title, notification.body);
          if click {
            let opened = worker.handle_notification_click(&notification, &notifier, &notifier)?;
            println!("opened {}", opened);
          }
        }
        None => println!("no notification shown"),
      }
      Ok(())
    }
    Command::Caches => {
      for name in caches.keys()? {
        let count = caches.open(&name)?.len()?;
        println!("{:<32} {}", name, count);
      }
      Ok(())
    }
  }
}

async fn install<S: CacheStorage, N: Network>(
  config: &Config,
  caches: CacheLayer<S>,
  network: Arc<N>,
) -> Result<()> {
  let (mut registration, mut events) = Registration::new(&config.origin_url()?, Arc::clone(&network))?;
  let worker = OfflineWorker::new(config, caches.clone(), network)?;

  let result = registration.register(worker).await;

  while let Ok(event) = events.try_recv() {
    match event {
      RegistrationEvent::UpdateFound { version } => println!("installing {}", version),
      RegistrationEvent::UpdateAvailable { version } => println!("update {} available", version),
      RegistrationEvent::ControllerChange { version } => println!("{} is now active", version),
      RegistrationEvent::InstallFailed { version, reason } => {
        println!("install of {} failed: {}", version, reason)
      }
    }
  }
  result?;

  if registration.waiting().is_some() {
    println!("waiting for reload to take over");
  }
  for name in caches.keys()? {
    println!("cache {}", name);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::testing::ScriptedNetwork;
  use crate::net::Response;
  use crate::worker::testing::{config, serve_manifest, url};

  fn setup() -> (Config, CacheLayer<SqliteStorage>, Arc<ScriptedNetwork>) {
    let config = config("v1");
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config);
    let caches = CacheLayer::new(SqliteStorage::open_in_memory().unwrap());
    (config, caches, network)
  }

  #[tokio::test]
  async fn test_install_then_fetch_from_cache() {
    let (config, caches, network) = setup();

    run(Command::Install, &config, caches.clone(), Arc::clone(&network))
      .await
      .unwrap();
    assert_eq!(caches.keys().unwrap(), vec!["static-v1"]);

    let calls = network.calls();
    run(
      Command::Fetch {
        url: "/javascript.html".to_string(),
        accept: "text/html".to_string(),
        method: "get".to_string(),
      },
      &config,
      caches,
      Arc::clone(&network),
    )
    .await
    .unwrap();
    assert_eq!(network.calls(), calls);
  }

  #[tokio::test]
  async fn test_fetch_before_install_fails() {
    let (config, caches, network) = setup();

    let result = run(
      Command::Fetch {
        url: "/".to_string(),
        accept: "text/html".to_string(),
        method: "GET".to_string(),
      },
      &config,
      caches,
      network,
    )
    .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_enqueue_then_sync() {
    let (config, caches, network) = setup();
    network.route(&url("/api/contact"), Response::new(200, "ok"));
    run(Command::Install, &config, caches.clone(), Arc::clone(&network))
      .await
      .unwrap();

    run(
      Command::Enqueue {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        message: "Hello".to_string(),
      },
      &config,
      caches.clone(),
      Arc::clone(&network),
    )
    .await
    .unwrap();
    assert_eq!(caches.open("contact-form-cache").unwrap().len().unwrap(), 1);

    run(Command::Sync { tag: None }, &config, caches.clone(), network)
      .await
      .unwrap();
    assert_eq!(caches.open("contact-form-cache").unwrap().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_activate_removes_other_generations() {
    let (config, caches, network) = setup();
    run(Command::Install, &config, caches.clone(), Arc::clone(&network))
      .await
      .unwrap();
    caches.open("web-training-v0").unwrap();

    run(Command::Activate, &config, caches.clone(), network)
      .await
      .unwrap();

    assert_eq!(caches.keys().unwrap(), vec!["static-v1"]);
  }

  #[tokio::test]
  async fn test_failed_upgrade_leaves_previous_generation_in_control() {
    let (v1, caches, network) = setup();
    run(Command::Install, &v1, caches.clone(), Arc::clone(&network))
      .await
      .unwrap();

    let v2 = config("v2");
    network.offline(&url("/style.css"));
    let install = run(Command::Install, &v2, caches.clone(), Arc::clone(&network)).await;
    assert!(install.is_err());
    assert_eq!(caches.keys().unwrap(), vec!["static-v1"]);

    assert!(OfflineWorker::resume(&v2, caches.clone(), Arc::clone(&network)).is_err());
    let activate = run(Command::Activate, &v2, caches.clone(), Arc::clone(&network)).await;
    assert!(activate.is_err());
    assert_eq!(caches.keys().unwrap(), vec!["static-v1"]);

    // v1 still serves from its cache
    let v1_worker = OfflineWorker::resume(&v1, caches, network).unwrap();
    assert_eq!(v1_worker.version(), "v1");
  }
}
