use agrum_core::{model::BayesianNetwork, triangulation::Phase, Config, Error};

#[cfg(test)]
mod tests {
    use super::*;

    fn no_progress(_: Phase, _: usize, _: usize) -> bool {
        true
    }

    #[test]
    fn chain_posterior_matches_hand_computed_marginal() {
        // A -> B -> C, all binary.
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["lo", "hi"]).unwrap();
        let b = bn.add_variable("B", ["lo", "hi"]).unwrap();
        let c = bn.add_variable("C", ["lo", "hi"]).unwrap();
        bn.add_arc(a, b).unwrap();
        bn.add_arc(b, c).unwrap();

        bn.set_cpt(a, vec![0.6, 0.4], true).unwrap();
        bn.set_cpt(b, vec![0.7, 0.3, 0.2, 0.8], true).unwrap();
        bn.set_cpt(c, vec![0.9, 0.1, 0.5, 0.5], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();

        // P(B) = P(B|A=lo)P(A=lo) + P(B|A=hi)P(A=hi)
        let post_b = engine.posterior(&[b]).unwrap();
        let expected_b_lo = 0.7 * 0.6 + 0.2 * 0.4;
        assert!((post_b.values()[[0]] - expected_b_lo).abs() < 1e-9);

        // P(C) = sum_b P(C|B=b) P(B=b)
        let post_c = engine.posterior(&[c]).unwrap();
        let expected_c_lo = 0.9 * expected_b_lo + 0.5 * (1.0 - expected_b_lo);
        assert!((post_c.values()[[0]] - expected_c_lo).abs() < 1e-9);
    }

    #[test]
    fn chain_with_hard_evidence_cuts_off_upstream_influence() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["lo", "hi"]).unwrap();
        let b = bn.add_variable("B", ["lo", "hi"]).unwrap();
        let c = bn.add_variable("C", ["lo", "hi"]).unwrap();
        bn.add_arc(a, b).unwrap();
        bn.add_arc(b, c).unwrap();

        bn.set_cpt(a, vec![0.6, 0.4], true).unwrap();
        bn.set_cpt(b, vec![0.7, 0.3, 0.2, 0.8], true).unwrap();
        bn.set_cpt(c, vec![0.9, 0.1, 0.5, 0.5], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        // B fully explains C: once B is observed, A no longer affects C.
        engine.observe_hard(b, 0).unwrap();

        let post_c = engine.posterior(&[c]).unwrap();
        assert!((post_c.values()[[0]] - 0.9).abs() < 1e-9);
        assert!((post_c.values()[[1]] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn v_structure_explains_away() {
        // A -> C <- B, both binary parents independent a priori.
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["no", "yes"]).unwrap();
        let b = bn.add_variable("B", ["no", "yes"]).unwrap();
        let c = bn.add_variable("C", ["no", "yes"]).unwrap();
        bn.add_arc(a, c).unwrap();
        bn.add_arc(b, c).unwrap();

        bn.set_cpt(a, vec![0.5, 0.5], true).unwrap();
        bn.set_cpt(b, vec![0.5, 0.5], true).unwrap();
        // P(C=yes | A, B): noisy-or-ish, so C=yes is most likely explained
        // by either parent being "yes", and observing C=yes with A=yes
        // should reduce belief that B=yes (explaining away).
        bn.set_cpt(c, vec![0.99, 0.01, 0.1, 0.9, 0.1, 0.9, 0.01, 0.99], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        engine.observe_hard(c, 1).unwrap();
        let baseline = engine.posterior(&[b]).unwrap().values()[[1]];

        engine.observe_hard(a, 1).unwrap();
        let explained_away = engine.posterior(&[b]).unwrap().values()[[1]];

        assert!(explained_away < baseline, "observing a competing cause should lower belief in the other");
    }

    #[test]
    fn soft_evidence_shifts_posterior_toward_likelihood() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["lo", "hi"]).unwrap();
        bn.set_cpt(a, vec![0.5, 0.5], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        engine.observe_soft(a, vec![1.0, 3.0]).unwrap();

        let post = engine.posterior(&[a]).unwrap();
        assert!((post.values()[[1]] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn re_observing_evidence_updates_posterior_incrementally() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["lo", "hi"]).unwrap();
        let b = bn.add_variable("B", ["lo", "hi"]).unwrap();
        bn.add_arc(a, b).unwrap();
        bn.set_cpt(a, vec![0.5, 0.5], true).unwrap();
        bn.set_cpt(b, vec![0.9, 0.1, 0.1, 0.9], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        engine.observe_hard(a, 0).unwrap();
        let first = engine.posterior(&[b]).unwrap().values()[[0]];

        engine.observe_hard(a, 1).unwrap();
        let second = engine.posterior(&[b]).unwrap().values()[[0]];

        assert!((first - 0.9).abs() < 1e-9);
        assert!((second - 0.1).abs() < 1e-9);
    }

    #[test]
    fn contradictory_hard_evidence_is_zero_mass() {
        // B is deterministically A's negation; forcing both to the same
        // label is impossible under the model.
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        let b = bn.add_variable("B", ["0", "1"]).unwrap();
        bn.add_arc(a, b).unwrap();
        bn.set_cpt(a, vec![0.5, 0.5], true).unwrap();
        bn.set_cpt(b, vec![0.0, 1.0, 1.0, 0.0], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        engine.observe_hard(a, 0).unwrap();
        engine.observe_hard(b, 0).unwrap();

        assert_eq!(engine.posterior(&[a]).unwrap_err(), Error::ZeroEvidenceMass);
        // evidenceProbability() reports the contradiction as a plain zero,
        // not an error — only posterior() raises ZeroEvidenceMass.
        assert_eq!(engine.evidence_probability().unwrap(), 0.0);
    }

    #[test]
    fn disconnected_network_factorizes_independently() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        let b = bn.add_variable("B", ["0", "1"]).unwrap();
        bn.set_cpt(a, vec![0.3, 0.7], true).unwrap();
        bn.set_cpt(b, vec![0.8, 0.2], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        engine.observe_hard(a, 0).unwrap();
        // Observing A must not move B's marginal at all.
        let post_b = engine.posterior(&[b]).unwrap();
        assert!((post_b.values()[[0]] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn disconnected_multi_clique_components_propagate_internally() {
        // Two separate 3-variable chains, A1->B1->C1 and A2->B2->C2, each of
        // which triangulates to more than one clique. Evidence set on the
        // "other" clique of a component (C1, C2) must still reach every
        // clique in its own component while leaving the other component's
        // posteriors untouched.
        let mut bn = BayesianNetwork::new(Config::default());
        let a1 = bn.add_variable("A1", ["lo", "hi"]).unwrap();
        let b1 = bn.add_variable("B1", ["lo", "hi"]).unwrap();
        let c1 = bn.add_variable("C1", ["lo", "hi"]).unwrap();
        bn.add_arc(a1, b1).unwrap();
        bn.add_arc(b1, c1).unwrap();
        bn.set_cpt(a1, vec![0.6, 0.4], true).unwrap();
        bn.set_cpt(b1, vec![0.7, 0.3, 0.2, 0.8], true).unwrap();
        bn.set_cpt(c1, vec![0.9, 0.1, 0.5, 0.5], true).unwrap();

        let a2 = bn.add_variable("A2", ["lo", "hi"]).unwrap();
        let b2 = bn.add_variable("B2", ["lo", "hi"]).unwrap();
        let c2 = bn.add_variable("C2", ["lo", "hi"]).unwrap();
        bn.add_arc(a2, b2).unwrap();
        bn.add_arc(b2, c2).unwrap();
        bn.set_cpt(a2, vec![0.3, 0.7], true).unwrap();
        bn.set_cpt(b2, vec![0.5, 0.5, 0.1, 0.9], true).unwrap();
        bn.set_cpt(c2, vec![0.2, 0.8, 0.6, 0.4], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        // Evidence on C1 must influence A1 through B1's internal message,
        // and must not move anything in the A2/B2/C2 component.
        engine.observe_hard(c1, 0).unwrap();

        let post_a1 = engine.posterior(&[a1]).unwrap();
        let joint_a1_lo = 0.6 * (0.7 * 0.9 + 0.3 * 0.5);
        let joint_a1_hi = 0.4 * (0.2 * 0.9 + 0.8 * 0.5);
        let expected_a1_lo = joint_a1_lo / (joint_a1_lo + joint_a1_hi);
        assert!((post_a1.values()[[0]] - expected_a1_lo).abs() < 1e-9);

        let post_a2 = engine.posterior(&[a2]).unwrap();
        assert!((post_a2.values()[[0]] - 0.3).abs() < 1e-9);

        let post_c2 = engine.posterior(&[c2]).unwrap();
        let expected_c2_lo = 0.3 * (0.5 * 0.2 + 0.5 * 0.6) + 0.7 * (0.1 * 0.2 + 0.9 * 0.6);
        assert!((post_c2.values()[[0]] - expected_c2_lo).abs() < 1e-9);
    }

    #[test]
    fn single_node_network_answers_its_own_prior() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("Solo", ["0", "1", "2"]).unwrap();
        bn.set_cpt(a, vec![0.2, 0.3, 0.5], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        let post = engine.posterior(&[a]).unwrap();
        assert!((post.values()[[2]] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn query_outside_any_clique_is_rejected() {
        // Two disconnected binary variables: {A, B} is never a single clique.
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        let b = bn.add_variable("B", ["0", "1"]).unwrap();
        bn.set_cpt(a, vec![0.5, 0.5], true).unwrap();
        bn.set_cpt(b, vec![0.5, 0.5], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        assert!(matches!(engine.posterior(&[a, b]), Err(Error::NotSubsetOfClique(_))));
    }

    #[test]
    fn invalid_hard_evidence_label_is_rejected_up_front() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        bn.set_cpt(a, vec![0.5, 0.5], true).unwrap();

        let mut engine = bn.build_engine(no_progress).unwrap();
        assert!(matches!(engine.observe_hard(a, 5), Err(Error::InvalidEvidenceVector(_, _))));
    }
}
