#[cfg(test)]
mod tests {
    use crate::Equilibrium::model_api::PhaseState;
    use crate::Equilibrium::stability::{StabilityAnalyzer, tpd};
    use crate::Models::activity::{NrtlGammaPhi, NrtlParams};
    use crate::Models::ideal::AntoineParams;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn antoine() -> AntoineParams {
        AntoineParams {
            a: vec![9.2645757520, 9.3068528194],
            b: vec![3000.0, 3500.0],
            c: vec![0.0, 0.0],
        }
    }

    fn lle_model() -> NrtlGammaPhi {
        NrtlGammaPhi::new(antoine(), vec![90.0, 60.0], NrtlParams::binary(2.5, 2.5, 0.3)).unwrap()
    }

    fn vle_model() -> NrtlGammaPhi {
        NrtlGammaPhi::new(antoine(), vec![90.0, 60.0], NrtlParams::binary(0.5, 0.3, 0.3)).unwrap()
    }

    #[test]
    fn test_tpd_value_liquid_trial() {
        // demixing binary, z = [0.3, 0.7]: the component-1 rich trial sits
        // well below the tangent plane
        let model = lle_model();
        let z = DVector::from_vec(vec![0.3, 0.7]);
        let w = DVector::from_vec(vec![0.95, 0.05]);
        let value = tpd(
            &w,
            &z,
            320.0,
            1.0,
            &model,
            PhaseState::Liquid,
            PhaseState::Liquid,
        )
        .unwrap();
        assert_relative_eq!(value, -0.31252221091294935, epsilon = 1e-8);
    }

    #[test]
    fn test_tpd_value_vapor_trial() {
        let model = vle_model();
        let z = DVector::from_vec(vec![0.4, 0.6]);
        let w = DVector::from_vec(vec![0.6, 0.4]);
        let value = tpd(
            &w,
            &z,
            350.0,
            1.0,
            &model,
            PhaseState::Vapor,
            PhaseState::Liquid,
        )
        .unwrap();
        assert_relative_eq!(value, -0.2680636032145695, epsilon = 1e-8);
    }

    #[test]
    fn test_tpd_min_unstable_feed() {
        let model = lle_model();
        let analyzer = StabilityAnalyzer::default();
        let z = DVector::from_vec(vec![0.3, 0.7]);
        let w0 = DVector::from_vec(vec![0.9, 0.1]);
        let res = analyzer
            .tpd_min(
                &w0,
                &z,
                320.0,
                1.0,
                &model,
                PhaseState::Liquid,
                PhaseState::Liquid,
            )
            .unwrap();
        assert!(res.converged);
        assert_relative_eq!(res.tpd, -0.32055567, epsilon = 1e-5);
        assert_relative_eq!(res.w[0], 0.9767, epsilon = 1e-3);
        println!("tpd minimum: {} at w1 = {}", res.tpd, res.w[0]);
    }

    #[test]
    fn test_tpd_min_stable_feed() {
        // mildly non-ideal liquid: no trial beats the tangent plane
        let model = vle_model();
        let analyzer = StabilityAnalyzer::default();
        let z = DVector::from_vec(vec![0.4, 0.6]);
        let w0 = DVector::from_vec(vec![0.95, 0.05]);
        let res = analyzer
            .tpd_min(
                &w0,
                &z,
                350.0,
                1.0,
                &model,
                PhaseState::Liquid,
                PhaseState::Liquid,
            )
            .unwrap();
        assert!(res.tpd > -1e-6);
    }

    #[test]
    fn test_tpd_minimas_finds_both() {
        // the demixing binary has two distinct minima, the deeper one on
        // the component-1 rich side
        let model = lle_model();
        let analyzer = StabilityAnalyzer::default();
        let z = DVector::from_vec(vec![0.3, 0.7]);
        let minima = analyzer
            .tpd_minimas(
                2,
                &z,
                320.0,
                1.0,
                &model,
                PhaseState::Liquid,
                PhaseState::Liquid,
            )
            .unwrap();
        assert_eq!(minima.len(), 2);
        assert!(minima[0].tpd <= minima[1].tpd);
        assert_relative_eq!(minima[0].tpd, -0.32055567, epsilon = 1e-4);
        assert_relative_eq!(minima[0].w[0], 0.9767, epsilon = 1e-3);
        assert_relative_eq!(minima[1].tpd, -0.02665841, epsilon = 1e-4);
        assert_relative_eq!(minima[1].w[0], 0.065, epsilon = 2e-3);
    }

    #[test]
    fn test_lle_init_brackets_the_feed() {
        let model = lle_model();
        let analyzer = StabilityAnalyzer::default();
        let z = DVector::from_vec(vec![0.3, 0.7]);
        let (wa, wb) = analyzer.lle_init(&z, 320.0, 1.0, &model).unwrap();
        // one guess rich and one lean in component 1
        let (rich, lean) = if wa[0] > wb[0] { (wa, wb) } else { (wb, wa) };
        assert!(rich[0] > 0.9);
        assert!(lean[0] < 0.1);
    }

    #[test]
    fn test_negative_tpd_implies_two_phase_split() {
        // a negative tpd minimum promises that a flash seeded from the
        // feed and the minimizer splits with beta strictly inside (0, 1)
        use crate::Equilibrium::flash::{FlashStatus, TwoPhaseFlash};
        let model = lle_model();
        let analyzer = StabilityAnalyzer::default();
        let z = DVector::from_vec(vec![0.3, 0.7]);
        let w0 = DVector::from_vec(vec![0.9, 0.1]);
        let found = analyzer
            .tpd_min(
                &w0,
                &z,
                320.0,
                1.0,
                &model,
                PhaseState::Liquid,
                PhaseState::Liquid,
            )
            .unwrap();
        assert!(found.tpd < 0.0);
        let flash = TwoPhaseFlash::new();
        let res = flash
            .solve(
                &z,
                &found.w,
                (PhaseState::Liquid, PhaseState::Liquid),
                &z,
                320.0,
                1.0,
                &model,
            )
            .unwrap();
        assert_eq!(res.status, FlashStatus::Converged);
        assert!(res.beta > 0.0 && res.beta < 1.0);
    }

    #[test]
    fn test_tpd_sign_against_flash_region() {
        // inside the two-phase region tpd at the converged minimum is
        // negative, far outside it is not
        let model = lle_model();
        let analyzer = StabilityAnalyzer::default();
        let stable_z = DVector::from_vec(vec![0.005, 0.995]);
        let minima = analyzer
            .tpd_minimas(
                2,
                &stable_z,
                320.0,
                1.0,
                &model,
                PhaseState::Liquid,
                PhaseState::Liquid,
            )
            .unwrap();
        assert!(minima[0].tpd > -1e-6);
    }
}
