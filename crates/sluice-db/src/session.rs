//! Execution contexts with their own last-error slot.
//!
//! A [`Session`] forwards every call to its [`Pipeline`] and records any
//! failure, so an embedder can ask for the last error after the fact
//! instead of inspecting each result. Sessions of the same pipeline do not
//! see each other's errors.

use sluice_connectors::SourceRow;
use sluice_core::cursor::{FromValue, SinkRow};
use sluice_core::diagnostics::{ErrorCell, LastError};
use sluice_core::ErrorCode;

use crate::definition::{PumpDefinition, ReaderDefinition, StreamDefinition, WriterDefinition};
use crate::error::DbError;
use crate::pipeline::Pipeline;

/// A pipeline handle that remembers its most recent failure.
#[derive(Debug)]
pub struct Session {
    pipeline: Pipeline,
    errors: ErrorCell,
}

impl Session {
    pub(crate) fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            errors: ErrorCell::new(),
        }
    }

    /// The pipeline this session runs against.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn track<T>(&self, result: Result<T, DbError>) -> Result<T, DbError> {
        if let Err(e) = &result {
            self.errors.record(e);
        }
        result
    }

    /// See [`Pipeline::create_stream`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn create_stream(&self, definition: StreamDefinition) -> Result<(), DbError> {
        self.track(self.pipeline.create_stream(definition))
    }

    /// See [`Pipeline::drop_stream`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn drop_stream(&self, name: &str) -> Result<(), DbError> {
        self.track(self.pipeline.drop_stream(name))
    }

    /// See [`Pipeline::create_pump`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn create_pump(&self, definition: PumpDefinition) -> Result<(), DbError> {
        self.track(self.pipeline.create_pump(definition))
    }

    /// See [`Pipeline::start_pump`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn start_pump(&self, name: &str) -> Result<(), DbError> {
        self.track(self.pipeline.start_pump(name))
    }

    /// See [`Pipeline::stop_pump`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn stop_pump(&self, name: &str) -> Result<(), DbError> {
        self.track(self.pipeline.stop_pump(name))
    }

    /// See [`Pipeline::drop_pump`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn drop_pump(&self, name: &str) -> Result<(), DbError> {
        self.track(self.pipeline.drop_pump(name))
    }

    /// See [`Pipeline::create_reader`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn create_reader(&self, definition: ReaderDefinition) -> Result<(), DbError> {
        self.track(self.pipeline.create_reader(definition))
    }

    /// See [`Pipeline::drop_reader`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn drop_reader(&self, name: &str) -> Result<(), DbError> {
        self.track(self.pipeline.drop_reader(name))
    }

    /// See [`Pipeline::create_writer`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn create_writer(&self, definition: WriterDefinition) -> Result<(), DbError> {
        self.track(self.pipeline.create_writer(definition))
    }

    /// See [`Pipeline::drop_writer`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn drop_writer(&self, name: &str) -> Result<(), DbError> {
        self.track(self.pipeline.drop_writer(name))
    }

    /// See [`Pipeline::push`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn push(&self, queue: &str, row: SourceRow) -> Result<(), DbError> {
        self.track(self.pipeline.push(queue, row))
    }

    /// See [`Pipeline::pop`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn pop(&self, queue: &str) -> Result<SinkRow, DbError> {
        self.track(self.pipeline.pop(queue))
    }

    /// See [`Pipeline::pop_non_blocking`].
    ///
    /// # Errors
    ///
    /// As the pipeline call; the failure is also recorded.
    pub fn pop_non_blocking(&self, queue: &str) -> Result<Option<SinkRow>, DbError> {
        self.track(self.pipeline.pop_non_blocking(queue))
    }

    /// Reads column `index` of a popped row, recording a failed read.
    ///
    /// # Errors
    ///
    /// Index out of range, column already read, NULL value or type
    /// mismatch.
    pub fn read<T: FromValue>(&self, row: &mut SinkRow, index: usize) -> Result<T, DbError> {
        self.track(row.get(index).map_err(DbError::from))
    }

    /// Most recent failure in this session.
    #[must_use]
    pub fn last_error(&self) -> Option<LastError> {
        self.errors.last()
    }

    /// Code of the most recent failure, [`ErrorCode::Ok`] when none.
    #[must_use]
    pub fn last_error_code(&self) -> ErrorCode {
        self.errors.last().map_or(ErrorCode::Ok, |e| e.code)
    }

    /// Forgets the recorded failure.
    pub fn clear_error(&self) {
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{ColumnDef, SqlType};

    #[test]
    fn test_session_records_failures_only() {
        let pipeline = Pipeline::open().unwrap();
        let session = pipeline.session();
        assert_eq!(session.last_error_code(), ErrorCode::Ok);

        assert!(session.drop_stream("missing").is_err());
        let err = session.last_error().unwrap();
        assert_eq!(err.code, ErrorCode::Sql);
        assert!(err.message.contains("missing"));

        session
            .create_stream(StreamDefinition::source(
                "s",
                vec![ColumnDef::new("a", SqlType::Integer)],
            ))
            .unwrap();
        assert_eq!(session.last_error_code(), ErrorCode::Sql);

        session.clear_error();
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let pipeline = Pipeline::open().unwrap();
        let a = pipeline.session();
        let b = pipeline.session();
        assert!(a.pop_non_blocking("nowhere").is_err());
        assert_eq!(a.last_error_code(), ErrorCode::Unavailable);
        assert_eq!(b.last_error_code(), ErrorCode::Ok);
        assert!(!b.pipeline().is_closed());
    }
}
