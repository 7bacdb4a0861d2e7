//! Atomic commit across several transactions, possibly on different shards.

use futures::future::join_all;
use proven_access_transport::Transport;
use tracing::{debug, warn};

use crate::error::Result;
use crate::transaction::ClientTransaction;

/// Commit every transaction or none of them.
///
/// All transactions are sealed for three-phase commit and walked through
/// can-commit and pre-commit together. If any of them fails before the final
/// phase, all are aborted and the first failure is returned.
///
/// # Errors
///
/// Returns the first failure. A failure during the final phase can leave
/// some transactions committed.
pub async fn commit_coordinated<T: Transport>(
    transactions: &mut [ClientTransaction<T>],
) -> Result<()> {
    debug!("coordinating commit of {} transactions", transactions.len());

    let prepared = async {
        first_error(join_all(transactions.iter_mut().map(ClientTransaction::prepare)).await)?;
        first_error(join_all(transactions.iter_mut().map(ClientTransaction::can_commit)).await)?;
        first_error(join_all(transactions.iter_mut().map(ClientTransaction::pre_commit)).await)
    }
    .await;

    if let Err(e) = prepared {
        warn!("coordinated commit failed, aborting all: {}", e);
        for result in join_all(transactions.iter_mut().map(ClientTransaction::abort)).await {
            if let Err(abort_error) = result {
                debug!("abort after failed commit: {}", abort_error);
            }
        }
        return Err(e);
    }

    first_error(join_all(transactions.iter_mut().map(ClientTransaction::do_commit)).await)
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}
