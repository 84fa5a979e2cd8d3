use crate::{
    cancel::CancellationToken,
    driver::{Driver, DriverConnection},
    result::{ConduitError, Result},
};
use log::debug;

/// Owns one backend connection for the duration of one statement.
/// Dropping the scope closes the connection, on success, error and unwind alike.
pub struct ConnectionScope<C: DriverConnection> {
    connection: C,
    provider: &'static str,
}

impl<C: DriverConnection> ConnectionScope<C> {
    /// Open a connection through the driver, unless cancellation was already requested
    pub fn acquire<D>(
        driver: &D,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<Self>
    where
        D: Driver<Connection = C>,
    {
        if cancel.is_cancelled() {
            return Err(ConduitError::Cancelled);
        }

        let connection = driver.open(connection_string)?;
        debug!("opened {} connection", driver.name());
        Ok(ConnectionScope {
            connection,
            provider: driver.name(),
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

impl<C: DriverConnection> Drop for ConnectionScope<C> {
    fn drop(&mut self) {
        debug!("closing {} connection", self.provider);
    }
}
