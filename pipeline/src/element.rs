use std::thread::{self, JoinHandle};

use log::error;

use common::error::{Error, Result};

/// A node of the pipeline: one straight-line receive/process/send loop.
/// `run` returns when every input has delivered its end marker (or on an
/// unrecoverable error, after propagating end downstream where possible).
pub trait ProcessingElement: Send {
    fn run(&mut self) -> Result<()>;
}

/// Runs a processing element on its own OS thread.
pub struct ThreadedElement {
    name: String,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ThreadedElement {
    pub fn spawn(name: &str, mut element: Box<dyn ProcessingElement>) -> ThreadedElement {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || element.run())
            .expect("spawning a pipeline thread");
        ThreadedElement {
            name: name.to_string(),
            handle: Some(handle),
        }
    }

    /// Waits for the element to finish and surfaces its result.
    pub fn join(mut self) -> Result<()> {
        let handle = self.handle.take().expect("joined twice");
        match handle.join() {
            Ok(result) => {
                if let Err(ref e) = result {
                    error!("element {} exited with error: {}", self.name, e);
                }
                result
            }
            Err(_) => Err(Error::Transport(format!(
                "element {} panicked",
                self.name
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;
    impl ProcessingElement for Nop {
        fn run(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Fails;
    impl ProcessingElement for Fails {
        fn run(&mut self) -> Result<()> {
            Err(Error::Transport("boom".into()))
        }
    }

    #[test]
    fn join_returns_the_element_result() {
        assert!(ThreadedElement::spawn("nop", Box::new(Nop)).join().is_ok());
        assert!(ThreadedElement::spawn("fails", Box::new(Fails))
            .join()
            .is_err());
    }
}
