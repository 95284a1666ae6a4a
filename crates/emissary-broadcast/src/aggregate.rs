use emissary_core::{AggregateError, DispatchError, DispatchResult};

/// Combines the failures of one broadcast into its result.
///
/// # Errors
///
/// - the single failure, if there is exactly one
/// - the first failure, if every failure is a cancellation
/// - an aggregate of all failures otherwise
pub fn aggregate_failures(mut failures: Vec<DispatchError>) -> DispatchResult<()> {
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ if failures.iter().all(DispatchError::is_cancellation) => Err(failures.remove(0)),
        _ => Err(AggregateError::new(failures).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_no_failures_is_ok() {
        assert!(aggregate_failures(Vec::new()).is_ok());
    }

    #[test]
    fn test_single_failure_is_unchanged() {
        let failure = DispatchError::msg("boom");
        let error = aggregate_failures(vec![failure.clone()]).unwrap_err();
        assert!(error.same_as(&failure));
    }

    #[test]
    fn test_all_cancellations_collapse() {
        let error = aggregate_failures(vec![
            DispatchError::cancelled_because("first"),
            DispatchError::cancelled(),
        ])
        .unwrap_err();
        match error {
            DispatchError::Cancelled(cancellation) => assert_eq!(cancellation.reason(), Some("first")),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_failures_aggregate() {
        let error = aggregate_failures(vec![DispatchError::cancelled(), DispatchError::msg("boom")])
            .unwrap_err();
        let inner = error.aggregated().unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner.iter().filter(|e| e.is_cancellation()).count(), 1);
    }

    proptest! {
        #[test]
        fn prop_aggregation_shape(kinds in proptest::collection::vec(any::<bool>(), 0..8)) {
            let failures: Vec<DispatchError> = kinds
                .iter()
                .map(|&cancelled| if cancelled { DispatchError::cancelled() } else { DispatchError::msg("boom") })
                .collect();

            match aggregate_failures(failures) {
                Ok(()) => prop_assert!(kinds.is_empty()),
                Err(error) => {
                    let all_cancelled = kinds.iter().all(|&cancelled| cancelled);
                    if kinds.len() == 1 || all_cancelled {
                        prop_assert!(error.aggregated().is_none());
                        prop_assert_eq!(error.is_cancellation(), kinds[0]);
                    } else {
                        prop_assert_eq!(error.aggregated().map(<[DispatchError]>::len), Some(kinds.len()));
                    }
                }
            }
        }
    }
}
