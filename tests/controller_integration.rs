//! Controller Integration Tests
//!
//! Lifecycle scenarios against the in-memory collaborators: supersession,
//! wallet context switches, decryption retries and derived UI flags.

use std::sync::Arc;

use fhe_bmi::calculator::testing::InMemoryBackend;
use fhe_bmi::calculator::{
    Address, BmiCategory, CalculatorError, ChainId, ControllerConfig, ControllerEvent,
    DecryptionError, DecryptionSignature, Deployment, DeploymentRegistry,
    EncryptedCalculationController, ErrorKind, Phase, SignatureCache, WalletContext,
};

const CONTRACT: Address = Address([0xc0; 20]);
const ALICE: Address = Address([0xa1; 20]);
const BOB: Address = Address([0xb0; 20]);

struct Harness {
    controller: Arc<EncryptedCalculationController>,
    backend: InMemoryBackend,
    context: WalletContext,
}

fn harness() -> Harness {
    let backend = InMemoryBackend::new();
    let context = WalletContext::connected(ALICE, ChainId::HARDHAT);
    let deployments = DeploymentRegistry::with_known_networks()
        .with(Deployment::new(ChainId::HARDHAT, "hardhat", CONTRACT));
    let controller = Arc::new(EncryptedCalculationController::new(
        ControllerConfig::local(),
        context.clone(),
        deployments,
        backend.collaborators(),
    ));

    Harness {
        controller,
        backend,
        context,
    }
}

/// Let spawned tasks run until `condition` holds
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Generation Tests
// ============================================================================

mod generation_tests {
    use super::*;

    #[tokio::test]
    async fn test_only_last_calculation_sets_handle() {
        let h = harness();
        h.backend.encryption.gate().close();

        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(170, 65).await })
        };
        wait_until(|| h.controller.phase() == Phase::Encrypting).await;

        // A new request supersedes the one stuck in encryption
        h.controller.reset();
        let second = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(180, 95).await })
        };
        wait_until(|| h.backend.encryption.call_count() == 2).await;
        h.backend.encryption.gate().open();

        let first = first.await.unwrap();
        let second = second.await.unwrap().unwrap();

        match first {
            Err(CalculatorError::Superseded { stale, current }) => {
                assert_eq!(stale, 1);
                assert!(current > stale);
            }
            other => panic!("expected supersession, got {:?}", other),
        }
        assert_eq!(h.controller.handle(), Some(second));
        assert_eq!(h.backend.chain.submission_count(), 1);
        assert_eq!(h.controller.decrypt().await.unwrap(), BmiCategory::Overweight);
    }

    #[tokio::test]
    async fn test_late_confirmation_after_reset_is_ignored() {
        let h = harness();
        h.backend.chain.confirm_gate().close();

        let pending = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(170, 65).await })
        };
        wait_until(|| h.backend.chain.submission_count() == 1).await;

        h.controller.reset();
        h.backend.chain.confirm_gate().open();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_superseded());
        assert_eq!(h.controller.phase(), Phase::Idle);
        assert!(h.controller.handle().is_none());
        assert!(h.controller.current_request().is_none());
    }

    #[tokio::test]
    async fn test_generation_is_monotonic() {
        let h = harness();
        let mut last = h.controller.generation();

        for _ in 0..3 {
            h.controller.calculate(170, 65).await.unwrap();
            assert!(h.controller.generation() > last);
            last = h.controller.generation();

            h.controller.reset();
            assert!(h.controller.generation() > last);
            last = h.controller.generation();
        }
    }

    #[tokio::test]
    async fn test_failed_attempt_keeps_generation() {
        let h = harness();
        h.backend
            .chain
            .fail_next_submission(fhe_bmi::calculator::TransactionError::UserRejected);

        let err = h.controller.calculate(170, 65).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionRejected);
        assert_eq!(h.controller.generation(), 1);
        assert_eq!(h.controller.phase(), Phase::Error);

        // Recover with a fresh attempt
        h.controller.calculate(170, 65).await.unwrap();
        assert_eq!(h.controller.generation(), 2);
        assert_eq!(h.controller.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_reset_always_returns_to_idle() {
        let h = harness();

        h.controller.reset();
        assert_eq!(h.controller.phase(), Phase::Idle);

        h.controller.calculate(170, 65).await.unwrap();
        h.controller.decrypt().await.unwrap();
        h.controller.reset();

        let ui = h.controller.ui_state();
        assert_eq!(ui.phase, Phase::Idle);
        assert!(ui.handle.is_none());
        assert!(ui.category.is_none());
        assert!(ui.error.is_none());
        assert!(ui.message.is_empty());
    }
}

// ============================================================================
// Wallet Context Tests
// ============================================================================

mod context_tests {
    use super::*;

    #[tokio::test]
    async fn test_account_switch_while_encrypting_with_watcher() {
        let h = harness();
        let _watcher = h.controller.spawn_context_watcher();
        h.backend.encryption.gate().close();

        let pending = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(170, 65).await })
        };
        wait_until(|| h.controller.phase() == Phase::Encrypting).await;

        h.context.switch_account(BOB);
        wait_until(|| h.controller.phase() == Phase::Error).await;
        h.backend.encryption.gate().open();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_superseded());
        assert_eq!(h.backend.chain.submission_count(), 0);
        assert_eq!(h.controller.last_error(), Some(ErrorKind::ContextChanged));
        assert!(h.controller.current_request().is_none());
        assert!(h.controller.handle().is_none());
    }

    #[tokio::test]
    async fn test_account_switch_while_encrypting_without_watcher() {
        let h = harness();
        h.backend.encryption.gate().close();

        let pending = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(170, 65).await })
        };
        wait_until(|| h.controller.phase() == Phase::Encrypting).await;

        h.context.switch_account(BOB);
        h.backend.encryption.gate().open();

        // Detected at the next suspension point
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, CalculatorError::ContextChanged);
        assert_eq!(h.backend.chain.submission_count(), 0);
        assert_eq!(h.controller.phase(), Phase::Error);
        assert_eq!(h.controller.last_error(), Some(ErrorKind::ContextChanged));
    }

    #[tokio::test]
    async fn test_switch_away_and_back_while_encrypting() {
        let h = harness();
        let _watcher = h.controller.spawn_context_watcher();
        h.backend.encryption.gate().close();

        let pending = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(170, 65).await })
        };
        wait_until(|| h.controller.phase() == Phase::Encrypting).await;

        // The watcher only ever sees the final value, which equals the original
        h.context.switch_account(BOB);
        h.context.switch_account(ALICE);
        wait_until(|| h.controller.phase() == Phase::Error).await;
        h.backend.encryption.gate().open();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_superseded());
        assert_eq!(h.backend.chain.submission_count(), 0);
        assert_eq!(h.controller.last_error(), Some(ErrorKind::ContextChanged));
        assert!(h.controller.handle().is_none());
    }

    #[tokio::test]
    async fn test_switch_away_and_back_without_watcher() {
        let h = harness();
        h.backend.encryption.gate().close();

        let pending = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.calculate(170, 65).await })
        };
        wait_until(|| h.controller.phase() == Phase::Encrypting).await;

        h.context.switch_chain(ChainId::SEPOLIA);
        h.context.switch_chain(ChainId::HARDHAT);
        h.backend.encryption.gate().open();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, CalculatorError::ContextChanged);
        assert_eq!(h.backend.chain.submission_count(), 0);
        assert_eq!(h.controller.phase(), Phase::Error);
    }

    #[tokio::test]
    async fn test_switch_away_and_back_invalidates_ready_handle() {
        let h = harness();
        h.controller.calculate(170, 65).await.unwrap();

        h.context.switch_account(BOB);
        h.context.switch_account(ALICE);

        assert_eq!(
            h.controller.decrypt().await.unwrap_err(),
            CalculatorError::ContextChanged
        );
        assert!(h.controller.handle().is_none());
        assert_eq!(h.backend.oracle.decrypt_calls(), 0);
    }

    #[tokio::test]
    async fn test_chain_switch_clears_ready_handle() {
        let h = harness();
        let _watcher = h.controller.spawn_context_watcher();
        let mut events = h.controller.subscribe();

        h.controller.calculate(170, 65).await.unwrap();
        h.context.switch_chain(ChainId::SEPOLIA);

        loop {
            if let ControllerEvent::ContextInvalidated { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        let ui = h.controller.ui_state();
        assert_eq!(ui.phase, Phase::Idle);
        assert!(ui.handle.is_none());
        assert!(!ui.can_decrypt_category);
        // Sepolia has no deployment
        assert!(!ui.is_deployed);
        assert!(!ui.can_calculate_bmi);

        let err = h.controller.calculate(170, 65).await.unwrap_err();
        assert_eq!(err, CalculatorError::NotDeployed(ChainId::SEPOLIA));
    }

    #[tokio::test]
    async fn test_switching_back_requires_recalculation() {
        let h = harness();
        let _watcher = h.controller.spawn_context_watcher();

        h.controller.calculate(170, 65).await.unwrap();
        h.context.switch_account(BOB);
        wait_until(|| h.controller.handle().is_none()).await;
        h.context.switch_account(ALICE);

        assert_eq!(h.controller.decrypt().await.unwrap_err(), CalculatorError::NoHandle);
        assert_eq!(h.backend.oracle.decrypt_calls(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_blocks_calculation() {
        let h = harness();
        h.context.disconnect();

        assert!(!h.controller.ui_state().can_calculate_bmi);
        assert_eq!(
            h.controller.calculate(170, 65).await.unwrap_err(),
            CalculatorError::WalletNotConnected
        );
        assert_eq!(h.backend.encryption.call_count(), 0);
    }
}

// ============================================================================
// Decryption Tests
// ============================================================================

mod decryption_tests {
    use super::*;

    #[tokio::test]
    async fn test_reference_measurement_is_normal() {
        let h = harness();
        h.controller.calculate(170, 65).await.unwrap();

        let category = h.controller.decrypt().await.unwrap();
        assert_eq!(category, BmiCategory::Normal);
        assert_eq!(category.index(), 1);
        assert_eq!(category.name(), "Normal");
    }

    #[tokio::test]
    async fn test_decrypt_without_handle_calls_nothing() {
        let h = harness();

        let err = h.controller.decrypt().await.unwrap_err();
        assert_eq!(err, CalculatorError::NoHandle);
        assert_eq!(h.backend.oracle.signature_requests(), 0);
        assert_eq!(h.backend.oracle.decrypt_calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_decrypt_uses_cached_category() {
        let h = harness();
        h.controller.calculate(170, 65).await.unwrap();

        for _ in 0..3 {
            assert_eq!(h.controller.decrypt().await.unwrap(), BmiCategory::Normal);
        }
        assert_eq!(h.backend.oracle.decrypt_calls(), 1);
        assert_eq!(h.backend.oracle.signature_requests(), 1);
    }

    #[tokio::test]
    async fn test_oracle_error_then_retry() {
        let h = harness();
        h.controller.calculate(170, 65).await.unwrap();
        let handle = h.controller.handle();

        h.backend
            .oracle
            .fail_next_decrypt(DecryptionError::OracleUnavailable("relayer busy".into()));
        let err = h.controller.decrypt().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptionUnavailable);
        assert_eq!(h.controller.phase(), Phase::Error);
        assert_eq!(h.controller.handle(), handle);
        assert!(h.controller.ui_state().can_decrypt_category);

        assert_eq!(h.controller.decrypt().await.unwrap(), BmiCategory::Normal);
        assert_eq!(h.backend.chain.submission_count(), 1);
        // The signature from the failed attempt was reused
        assert_eq!(h.backend.oracle.signature_requests(), 1);
    }

    #[tokio::test]
    async fn test_signature_rejection_then_acceptance() {
        let h = harness();
        h.controller.calculate(170, 65).await.unwrap();

        h.backend.oracle.reject_next_signature();
        let err = h.controller.decrypt().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureRejected);
        assert_eq!(h.controller.phase(), Phase::Ready);
        assert!(h.backend.signatures.is_empty());

        assert_eq!(h.controller.decrypt().await.unwrap(), BmiCategory::Normal);
        assert_eq!(h.backend.signatures.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_signature_is_refreshed() {
        let h = harness();
        h.backend.signatures.put(DecryptionSignature {
            account: ALICE,
            contract: CONTRACT,
            signature: vec![0; 32],
            issued_at: 0,
            expires_at: 1,
        });

        h.controller.calculate(170, 65).await.unwrap();
        assert_eq!(h.controller.decrypt().await.unwrap(), BmiCategory::Normal);
        assert_eq!(h.backend.oracle.signature_requests(), 1);
    }

    #[tokio::test]
    async fn test_busy_while_decrypting() {
        let h = harness();
        h.controller.calculate(170, 65).await.unwrap();
        h.backend.oracle.gate().close();

        let pending = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.decrypt().await })
        };
        wait_until(|| h.backend.oracle.decrypt_calls() == 1).await;

        assert_eq!(h.controller.phase(), Phase::Decrypting);
        assert!(!h.controller.ui_state().can_calculate_bmi);
        assert_eq!(h.controller.calculate(170, 65).await.unwrap_err(), CalculatorError::Busy);
        assert_eq!(h.controller.decrypt().await.unwrap_err(), CalculatorError::Busy);

        h.backend.oracle.gate().open();
        assert_eq!(pending.await.unwrap().unwrap(), BmiCategory::Normal);
    }
}

// ============================================================================
// UI State Tests
// ============================================================================

mod ui_tests {
    use super::*;

    #[tokio::test]
    async fn test_flags_across_lifecycle() {
        let h = harness();

        let ui = h.controller.ui_state();
        assert!(ui.can_calculate_bmi);
        assert!(!ui.can_decrypt_category);
        assert_eq!(ui.contract_address, Some(CONTRACT));

        h.controller.calculate(170, 65).await.unwrap();
        let ui = h.controller.ui_state();
        assert!(ui.can_calculate_bmi);
        assert!(ui.can_decrypt_category);
        assert!(!ui.is_decrypted);

        h.controller.decrypt().await.unwrap();
        let ui = h.controller.ui_state();
        assert!(ui.is_decrypted);
        assert!(!ui.can_decrypt_category);
        assert_eq!(ui.category, Some(BmiCategory::Normal));
    }

    #[tokio::test]
    async fn test_phase_events_in_order() {
        let h = harness();
        let mut events = h.controller.subscribe();

        h.controller.calculate(170, 65).await.unwrap();
        h.controller.decrypt().await.unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ControllerEvent::PhaseChanged { phase, .. } = event {
                phases.push(phase);
            }
        }
        assert_eq!(
            phases,
            vec![
                Phase::Encrypting,
                Phase::Submitting,
                Phase::Confirming,
                Phase::Ready,
                Phase::Decrypting,
                Phase::Decrypted,
            ]
        );
    }

    #[tokio::test]
    async fn test_status_messages() {
        let h = harness();

        h.controller.calculate(170, 65).await.unwrap();
        assert!(h.controller.message().starts_with("BMI calculation completed"));

        h.controller.decrypt().await.unwrap();
        assert_eq!(h.controller.message(), "BMI category: Normal");

        let summary = h.controller.summary();
        assert_eq!(summary.phase, Phase::Decrypted);
        assert_eq!(summary.category, Some(BmiCategory::Normal));
    }
}
