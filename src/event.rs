use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Shell events
#[derive(Debug)]
pub enum Event {
  /// A line typed at the prompt
  Line(String),
  /// A watched query changed; the text is already rendered
  Update { watch: usize, text: String },
  /// Standard input was closed
  Eof,
}

/// Event handler that merges stdin lines with updates from watch tasks
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create an event handler that reads stdin on a background task
  pub fn new() -> Self {
    let handler = Self::detached();
    let tx = handler.sender();

    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        let event = match lines.next_line().await {
          Ok(Some(line)) => Event::Line(line),
          Ok(None) | Err(_) => Event::Eof,
        };
        let done = matches!(event, Event::Eof);
        if tx.send(event).is_err() || done {
          break;
        }
      }
    });

    handler
  }

  /// Create an event handler with no input source; events only arrive
  /// through [`EventHandler::sender`]
  pub fn detached() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender for tasks that produce events
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_detached_handler_relays_sent_events() {
    let mut events = EventHandler::detached();
    events.sender().send(Event::Line("books".to_string())).unwrap();
    events
      .sender()
      .send(Event::Update {
        watch: 1,
        text: "changed".to_string(),
      })
      .unwrap();

    assert!(matches!(events.next().await, Some(Event::Line(line)) if line == "books"));
    assert!(matches!(events.next().await, Some(Event::Update { watch: 1, .. })));
  }
}
