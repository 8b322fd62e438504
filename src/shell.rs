//! Interactive command loop over the query cache.

use color_eyre::{eyre::eyre, Report, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{QueryEndpoint, SessionToken, TokenProvider};
use crate::cache::{self, CacheContext, CacheEntry, QueryStatus, Tag};
use crate::commands::{self, Action, ResourceKind};
use crate::error::ErrorInfo;
use crate::event::{Event, EventHandler};
use crate::library::endpoints::{
  Authors, Books, Create, Delete, GetById, Genres, List, Login, Register, Resource, Update,
  UpdateArgs, Users,
};
use crate::library::types::{LoginInput, RegisterInput};

/// Runs `$body` with `$r` bound to the resource type behind a [`ResourceKind`].
macro_rules! with_resource {
  ($kind:expr, |$r:ident| $body:expr) => {
    match $kind {
      ResourceKind::Books => {
        type $r = Books;
        $body
      }
      ResourceKind::Authors => {
        type $r = Authors;
        $body
      }
      ResourceKind::Genres => {
        type $r = Genres;
        $body
      }
      ResourceKind::Users => {
        type $r = Users;
        $body
      }
    }
  };
}

type Render = fn(&CacheEntry) -> Option<String>;

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
  Print(String),
  Nothing,
  Quit,
}

struct Watch {
  label: String,
  task: JoinHandle<()>,
}

pub struct Shell {
  cache: CacheContext,
  tokens: Arc<SessionToken>,
  events: EventHandler,
  watches: BTreeMap<usize, Watch>,
  next_watch: usize,
}

impl Shell {
  pub fn new(cache: CacheContext, tokens: Arc<SessionToken>, events: EventHandler) -> Self {
    Self {
      cache,
      tokens,
      events,
      watches: BTreeMap::new(),
      next_watch: 0,
    }
  }

  /// Read commands until `quit` or end of input.
  pub async fn run(&mut self) -> Result<()> {
    println!(
      "libris {}. Type `help` for commands.",
      env!("CARGO_PKG_VERSION")
    );
    prompt();

    while let Some(event) = self.events.next().await {
      match event {
        Event::Line(line) => {
          match self.execute(&line).await {
            Ok(Step::Quit) => break,
            Ok(Step::Print(text)) => println!("{}", text),
            Ok(Step::Nothing) => {}
            Err(err) => println!("{}", describe_error(&err)),
          }
          prompt();
        }
        Event::Update { watch, text } => {
          let label = self.watches.get(&watch).map_or("", |w| w.label.as_str());
          println!("\n[watch #{} {}] {}", watch, label, text);
          prompt();
        }
        Event::Eof => break,
      }
    }

    self.stop_watches();
    Ok(())
  }

  /// Execute a single command line and print its output.
  pub async fn run_once(&mut self, line: &str) -> Result<()> {
    match self.execute(line).await {
      Ok(Step::Print(text)) => {
        println!("{}", text);
        Ok(())
      }
      Ok(_) => Ok(()),
      Err(err) => Err(eyre!(describe_error(&err))),
    }
  }

  pub async fn execute(&mut self, line: &str) -> Result<Step> {
    let Some(action) = commands::parse(line).map_err(|e| eyre!(e))? else {
      return Ok(Step::Nothing);
    };

    let text = match action {
      Action::List(kind) => with_resource!(kind, |R| self.list::<R>().await?),
      Action::Show(kind, id) => with_resource!(kind, |R| self.show::<R>(id).await?),
      Action::Create(kind, body) => with_resource!(kind, |R| self.create::<R>(body).await?),
      Action::Update(kind, id, body) => {
        with_resource!(kind, |R| self.update::<R>(id, body).await?)
      }
      Action::Delete(kind, id) => with_resource!(kind, |R| self.delete::<R>(id).await?),
      Action::Watch(kind, id) => with_resource!(kind, |R| self.watch::<R>(id).await?),
      Action::Unwatch(n) => self.unwatch(n)?,
      Action::Invalidate(tags) => self.invalidate(&tags),
      Action::Cache => self.dump_cache(),
      Action::Login { email, password } => self.login(email, password).await?,
      Action::Register {
        email,
        password,
        full_name,
      } => self.register(email, password, full_name).await?,
      Action::Logout => {
        self.tokens.clear();
        "Logged out".to_string()
      }
      Action::Help => commands::help(),
      Action::Quit => return Ok(Step::Quit),
    };

    Ok(Step::Print(text))
  }

  async fn list<R: Resource>(&self) -> Result<String>
  where
    R::Entity: fmt::Display,
  {
    let items = self.cache.query::<List<R>>(()).await?;
    Ok(render_list(&items))
  }

  async fn show<R: Resource>(&self, id: u64) -> Result<String>
  where
    R::Entity: fmt::Display,
  {
    let item = self.cache.query::<GetById<R>>(id).await?;
    Ok(item.to_string())
  }

  async fn create<R: Resource>(&self, body: Value) -> Result<String>
  where
    R::Entity: fmt::Display,
  {
    let input: R::Create = serde_json::from_value(body)
      .map_err(|e| eyre!("Invalid {} body: {}", R::KIND.to_lowercase(), e))?;
    let created = self.cache.mutate::<Create<R>>(input).await?;
    Ok(format!("Created {}", created))
  }

  async fn update<R: Resource>(&self, id: u64, body: Value) -> Result<String>
  where
    R::Entity: fmt::Display,
  {
    let data: R::Update = serde_json::from_value(body)
      .map_err(|e| eyre!("Invalid {} body: {}", R::KIND.to_lowercase(), e))?;
    let updated = self
      .cache
      .mutate::<Update<R>>(UpdateArgs { id, data })
      .await?;
    Ok(format!("Updated {}", updated))
  }

  async fn delete<R: Resource>(&self, id: u64) -> Result<String> {
    let deleted = self.cache.mutate::<Delete<R>>(id).await?;
    Ok(format!("{} #{}: {}", R::KIND, id, deleted))
  }

  async fn watch<R: Resource>(&mut self, id: Option<u64>) -> Result<String>
  where
    R::Entity: fmt::Display,
  {
    match id {
      Some(id) => {
        let label = format!("{} #{}", R::KIND, id);
        self
          .start_watch::<GetById<R>>(id, label, render_value::<R::Entity>)
          .await
      }
      None => {
        let label = format!("{} list", R::KIND);
        self
          .start_watch::<List<R>>((), label, render_items::<R::Entity>)
          .await
      }
    }
  }

  async fn start_watch<Q: QueryEndpoint>(
    &mut self,
    args: Q::Args,
    label: String,
    render: Render,
  ) -> Result<String> {
    let mut subscription = self.cache.subscribe_query::<Q>(args).await?;
    let initial = subscription
      .current()
      .map(|entry| describe_entry(&entry, render))
      .unwrap_or_default();

    self.next_watch += 1;
    let id = self.next_watch;
    let tx = self.events.sender();

    // The task owns the subscription; aborting it unsubscribes.
    let task = tokio::spawn(async move {
      while let Some(entry) = subscription.changed().await {
        let text = describe_entry(&entry, render);
        if tx.send(Event::Update { watch: id, text }).is_err() {
          break;
        }
      }
    });

    info!(watch = id, %label, "watch started");
    let reply = format!("Watching {} as #{}\n{}", label, id, initial);
    self.watches.insert(id, Watch { label, task });
    Ok(reply)
  }

  fn unwatch(&mut self, which: Option<usize>) -> Result<String> {
    match which {
      Some(id) => {
        let watch = self
          .watches
          .remove(&id)
          .ok_or_else(|| eyre!("No watch #{}", id))?;
        watch.task.abort();
        Ok(format!("Stopped watch #{} ({})", id, watch.label))
      }
      None => {
        let count = self.watches.len();
        self.stop_watches();
        Ok(format!("Stopped {} watches", count))
      }
    }
  }

  fn stop_watches(&mut self) {
    for (_, watch) in std::mem::take(&mut self.watches) {
      watch.task.abort();
    }
  }

  fn invalidate(&self, tags: &[Tag]) -> String {
    let invalidation = self.cache.invalidate_tags(tags);
    format!(
      "Refetching {} queries, evicted {}",
      invalidation.refetched.len(),
      invalidation.evicted.len()
    )
  }

  fn dump_cache(&self) -> String {
    let entries = self.cache.entries();
    if entries.is_empty() {
      return "(cache empty)".to_string();
    }
    let stats = self.cache.stats();
    let header = format!(
      "{} entries, {} tags, {} fetching, {} awaiting eviction",
      stats.entries, stats.tags, stats.in_flight, stats.pending_evictions
    );
    std::iter::once(header)
      .chain(entries.iter().map(describe_cache_line))
      .collect::<Vec<_>>()
      .join("\n")
  }

  async fn login(&self, email: String, password: String) -> Result<String> {
    let session = self
      .cache
      .mutate::<Login>(LoginInput { email, password })
      .await?;
    self.tokens.set(session.token.clone());
    Ok(match &session.user {
      Some(user) => format!("Logged in as {}", user.full_name),
      None => "Logged in".to_string(),
    })
  }

  async fn register(&self, email: String, password: String, full_name: String) -> Result<String> {
    self
      .cache
      .mutate::<Register>(RegisterInput {
        full_name,
        email: email.clone(),
        password,
      })
      .await?;
    Ok(format!("Registered {}. Run `login` to start a session.", email))
  }
}

fn prompt() {
  print!("libris> ");
  let _ = std::io::stdout().flush();
}

/// User-facing text for a failed command.
pub fn describe_error(err: &Report) -> String {
  match err.downcast_ref::<ErrorInfo>() {
    Some(e) if e.is_auth() => format!("error: {}. Use `login <email> <password>`.", e),
    Some(e) => format!("error: {}", e),
    None => format!("error: {}", err),
  }
}

fn render_list<T: fmt::Display>(items: &[T]) -> String {
  if items.is_empty() {
    return "(none)".to_string();
  }
  items
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("\n")
}

fn render_value<T: fmt::Display + Send + Sync + 'static>(entry: &CacheEntry) -> Option<String> {
  entry.value_as::<T>().map(|value| value.to_string())
}

fn render_items<T: fmt::Display + Send + Sync + 'static>(entry: &CacheEntry) -> Option<String> {
  entry.value_as::<Vec<T>>().map(|items| render_list(&items))
}

fn describe_entry(entry: &CacheEntry, render: Render) -> String {
  let status = status_label(entry.status());
  if let (QueryStatus::Rejected, Some(error)) = (entry.status(), entry.error()) {
    return format!("{}: {}", status, error);
  }
  match render(entry) {
    Some(body) => format!("{}\n{}", status, body),
    None => status.to_string(),
  }
}

fn describe_cache_line(entry: &CacheEntry) -> String {
  let (endpoint, args) =
    cache::decode(entry.key()).unwrap_or_else(|| (entry.key().to_string(), Value::Null));
  let tags = entry
    .provided_tags()
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(", ");
  let fetched = entry
    .last_fetched_at()
    .map(|at| at.format("%H:%M:%S").to_string())
    .unwrap_or_else(|| "never".to_string());

  format!(
    "{:<16} {:<8} {:<13} subs={} fetched={} tags=[{}]",
    endpoint,
    args.to_string(),
    status_label(entry.status()),
    entry.subscriber_count(),
    fetched,
    tags
  )
}

fn status_label(status: QueryStatus) -> &'static str {
  match status {
    QueryStatus::Uninitialized => "uninitialized",
    QueryStatus::Pending => "pending",
    QueryStatus::Fulfilled => "fulfilled",
    QueryStatus::Rejected => "rejected",
  }
}
