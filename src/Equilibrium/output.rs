//! Tabular presentation of flash results using prettytable, plus a JSON
//! serialization shortcut for downstream tooling.
use crate::Equilibrium::flash::FlashResult;
use crate::Equilibrium::multiflash::MultiphaseResult;
use crate::Equilibrium::model_api::EquilibriumError;
use prettytable::{Table, row};

impl FlashResult {
    /// Prints conditions and the two-phase split as tables.
    pub fn pretty_print(&self) {
        let mut head = Table::new();
        head.add_row(row!["Quantity", "Value", "Units"]);
        head.add_row(row!["Temperature", format!("{:.3}", self.temperature), "K"]);
        head.add_row(row!["Pressure", format!("{:.5}", self.pressure), "bar"]);
        head.add_row(row!["Phase fraction (beta)", format!("{:.6}", self.beta), "-"]);
        head.add_row(row!["Residual", format!("{:.3e}", self.error), "-"]);
        head.add_row(row!["Iterations", format!("{}", self.iterations), "-"]);
        head.add_row(row!["Status", format!("{:?}", self.status), "-"]);
        head.add_row(row!["Method", self.method.clone(), "-"]);
        head.printstd();

        let mut comp = Table::new();
        comp.add_row(row![
            "Component",
            format!("x ({})", self.states.0),
            format!("y ({})", self.states.1)
        ]);
        for i in 0..self.x.len() {
            comp.add_row(row![
                format!("{}", i),
                format!("{:.6}", self.x[i]),
                format!("{:.6}", self.y[i])
            ]);
        }
        comp.add_row(row![
            "molar volume",
            format!("{:.3}", self.vx),
            format!("{:.3}", self.vy)
        ]);
        comp.printstd();
    }

    pub fn to_json(&self) -> Result<String, EquilibriumError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl MultiphaseResult {
    /// Prints conditions, the phase fraction vector and every phase
    /// composition as tables. Absent phases show their theta value.
    pub fn pretty_print(&self) {
        let np = self.beta.len();
        let mut head = Table::new();
        head.add_row(row!["Quantity", "Value", "Units"]);
        head.add_row(row!["Temperature", format!("{:.3}", self.temperature), "K"]);
        head.add_row(row!["Pressure", format!("{:.5}", self.pressure), "bar"]);
        head.add_row(row!["Outer residual", format!("{:.3e}", self.error_outer), "-"]);
        head.add_row(row!["Inner residual", format!("{:.3e}", self.error_inner), "-"]);
        head.add_row(row!["Iterations", format!("{}", self.iterations), "-"]);
        head.add_row(row!["Status", format!("{:?}", self.status), "-"]);
        head.add_row(row!["Method", self.method.clone(), "-"]);
        head.printstd();

        let mut phases = Table::new();
        phases.add_row(row!["Phase", "State", "beta", "theta", "Molar volume"]);
        for k in 0..np {
            phases.add_row(row![
                format!("{}", k),
                format!("{}", self.states[k]),
                format!("{:.6}", self.beta[k]),
                format!("{:.6}", self.theta[k]),
                format!("{:.3}", self.volumes[k])
            ]);
        }
        phases.printstd();

        let mut comp = Table::new();
        let mut header = row!["Component"];
        for k in 0..np {
            header.add_cell(prettytable::Cell::new(&format!("x[{}]", k)));
        }
        comp.add_row(header);
        for i in 0..self.compositions[0].len() {
            let mut r = row![format!("{}", i)];
            for k in 0..np {
                r.add_cell(prettytable::Cell::new(&format!(
                    "{:.6}",
                    self.compositions[k][i]
                )));
            }
            comp.add_row(r);
        }
        comp.printstd();
    }

    pub fn to_json(&self) -> Result<String, EquilibriumError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
