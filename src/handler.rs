//! Sinks for problems found while reading.

use std::{cell::RefCell, rc::Rc};

use log::warn;

use crate::error::{XMLError, XMLStreamError};

/// Receives every problem the reader detects.
///
/// Fatal errors are also returned from the failing reader operation, so
/// [`fatal_error`](ErrorHandler::fatal_error) is a notification only.
/// Recoverable problems are delivered to [`error`](ErrorHandler::error) and
/// [`warning`](ErrorHandler::warning). Returning `Err` from either aborts reading with a
/// fatal error carrying the returned code.
pub trait ErrorHandler {
    fn fatal_error(&mut self, error: &XMLStreamError) {
        let _ = error;
    }

    fn error(&mut self, error: XMLStreamError) -> Result<(), XMLError> {
        warn!("{error}");
        Ok(())
    }

    fn warning(&mut self, error: XMLStreamError) -> Result<(), XMLError> {
        warn!("{error}");
        Ok(())
    }
}

/// Logs recoverable problems through the `log` facade.
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {}

/// Collects every problem, fatal ones included.
///
/// Clones share the same list, so a clone can be handed to the reader and the original
/// inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProblemCollector {
    problems: Rc<RefCell<Vec<XMLStreamError>>>,
}

impl ProblemCollector {
    pub fn problems(&self) -> Vec<XMLStreamError> {
        self.problems.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.problems.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<XMLStreamError> {
        std::mem::take(&mut *self.problems.borrow_mut())
    }
}

impl ErrorHandler for ProblemCollector {
    fn fatal_error(&mut self, error: &XMLStreamError) {
        self.problems.borrow_mut().push(error.clone());
    }

    fn error(&mut self, error: XMLStreamError) -> Result<(), XMLError> {
        self.problems.borrow_mut().push(error);
        Ok(())
    }

    fn warning(&mut self, error: XMLStreamError) -> Result<(), XMLError> {
        self.problems.borrow_mut().push(error);
        Ok(())
    }
}

/// Aborts on the first recoverable error. Warnings are logged.
pub struct FailOnError;

impl ErrorHandler for FailOnError {
    fn error(&mut self, error: XMLStreamError) -> Result<(), XMLError> {
        Err(error.error)
    }
}
