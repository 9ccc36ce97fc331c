use super::RecordReader;
use crate::error::DataError;
use crate::record::{PositionRecord, Wdl, MAX_EVAL, MAX_PIECES};
use indicatif::ProgressBar;
use shakmaty::{Color, Role, Square};
use std::fmt::{self, Display, Formatter};
use std::path::Path;

/// Highest material phase (all minor and major pieces on the board)
pub const MAX_PHASE: usize = 24;

/// Summary of a dataset gathered in one streaming pass with fixed memory
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStats {
    pub count: u64,
    /// Indexed by [`Wdl::code`]
    pub wdl: [u64; 3],
    pub eval_min: i16,
    pub eval_max: i16,
    eval_mean: f64,
    eval_m2: f64,
    pub pieces: [u64; MAX_PIECES as usize + 1],
    /// Pieces of each role, pawn first
    pub roles: [u64; 6],
    pub phases: [u64; MAX_PHASE + 1],
    fullmove_sum: u64,
    pub white_kings: [u64; 64],
    pub black_kings: [u64; 64],
    /// Eval and game result point in clearly different directions
    pub incongruent: u64,
    /// Evals within 200 of the bound, usually mate scores
    pub near_bound: u64,
}

impl Default for DatasetStats {
    fn default() -> Self {
        DatasetStats {
            count: 0,
            wdl: [0; 3],
            eval_min: i16::MAX,
            eval_max: i16::MIN,
            eval_mean: 0.0,
            eval_m2: 0.0,
            pieces: [0; MAX_PIECES as usize + 1],
            roles: [0; 6],
            phases: [0; MAX_PHASE + 1],
            fullmove_sum: 0,
            white_kings: [0; 64],
            black_kings: [0; 64],
            incongruent: 0,
            near_bound: 0,
        }
    }
}

impl DatasetStats {
    pub fn add(&mut self, record: &PositionRecord) {
        self.count += 1;
        self.wdl[record.wdl().code() as usize] += 1;

        let eval = record.eval();
        self.eval_min = self.eval_min.min(eval);
        self.eval_max = self.eval_max.max(eval);

        // Welford
        let x = f64::from(eval);
        let delta = x - self.eval_mean;
        self.eval_mean += delta / self.count as f64;
        self.eval_m2 += delta * (x - self.eval_mean);

        self.pieces[record.piece_count()] += 1;
        let board = record.board();
        for square in board.occupied() {
            if let Some(role) = board.role_at(square) {
                self.roles[role as usize - 1] += 1;
            }
        }
        self.phases[record.phase()] += 1;
        self.fullmove_sum += u64::from(record.fullmoves());

        self.white_kings[record.king(Color::White) as usize] += 1;
        self.black_kings[record.king(Color::Black) as usize] += 1;

        if is_incongruent(eval, record.wdl()) {
            self.incongruent += 1;
        }
        if i32::from(eval).abs() > MAX_EVAL - 200 {
            self.near_bound += 1;
        }
    }

    pub fn eval_mean(&self) -> f64 {
        self.eval_mean
    }

    /// Population variance of the evals
    pub fn eval_variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.eval_m2 / self.count as f64
        }
    }

    pub fn mean_pieces(&self) -> f64 {
        self.mean_of(&self.pieces)
    }

    pub fn mean_phase(&self) -> f64 {
        self.mean_of(&self.phases)
    }

    pub fn mean_fullmove(&self) -> f64 {
        self.ratio(self.fullmove_sum)
    }

    fn mean_of(&self, histogram: &[u64]) -> f64 {
        let sum: u64 = histogram
            .iter()
            .enumerate()
            .map(|(value, count)| value as u64 * count)
            .sum();
        self.ratio(sum)
    }

    fn ratio(&self, value: u64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            value as f64 / self.count as f64
        }
    }

    fn percent(&self, value: u64) -> f64 {
        self.ratio(value) * 100.0
    }
}

/// Winning eval but lost, losing eval but won, or a large eval in a drawn game
fn is_incongruent(eval: i16, wdl: Wdl) -> bool {
    match wdl {
        Wdl::Loss => eval > 200,
        Wdl::Win => eval < -200,
        Wdl::Draw => eval.unsigned_abs() > 400,
    }
}

pub fn collect_stats(path: &Path, progress: &ProgressBar) -> Result<DatasetStats, DataError> {
    let mut stats = DatasetStats::default();
    for record in RecordReader::open(path)? {
        stats.add(&record?);
        progress.inc(1);
    }
    Ok(stats)
}

impl Display for DatasetStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} positions", self.count)?;

        writeln!(f, "Win/draw/loss (white):")?;
        for (label, wdl) in [("Win", Wdl::Win), ("Draw", Wdl::Draw), ("Loss", Wdl::Loss)] {
            let n = self.wdl[wdl.code() as usize];
            writeln!(f, "  {:<5} {} ({:.2}%)", label, n, self.percent(n))?;
        }

        writeln!(f, "Eval (white, cp):")?;
        if self.count > 0 {
            writeln!(f, "  Min: {}  Max: {}", self.eval_min, self.eval_max)?;
        }
        writeln!(
            f,
            "  Mean: {:.2}  Std dev: {:.2}",
            self.eval_mean(),
            self.eval_variance().sqrt()
        )?;

        writeln!(f, "Pieces on board:")?;
        writeln!(f, "  Mean: {:.2}", self.mean_pieces())?;
        for (count, n) in self.pieces.iter().enumerate().filter(|(_, n)| **n > 0) {
            writeln!(f, "  {:2}: {} ({:.1}%)", count, n, self.percent(*n))?;
        }
        for (role, n) in Role::ALL.iter().zip(self.roles) {
            writeln!(f, "  {:?}s: {}", role, n)?;
        }

        writeln!(f, "Game phase:")?;
        writeln!(f, "  Mean: {:.2}", self.mean_phase())?;
        for (phase, n) in self.phases.iter().enumerate().filter(|(_, n)| **n > 0) {
            writeln!(f, "  {:2}: {} ({:.1}%)", phase, n, self.percent(*n))?;
        }

        writeln!(f, "Mean fullmove number: {:.2}", self.mean_fullmove())?;

        for (label, histogram) in [("White", &self.white_kings), ("Black", &self.black_kings)] {
            writeln!(f, "{} king positions:", label)?;
            let most = histogram.iter().enumerate().max_by_key(|(_, n)| **n);
            let least = histogram.iter().enumerate().min_by_key(|(_, n)| **n);
            if let (Some((most_sq, most)), Some((least_sq, least))) = (most, least) {
                writeln!(
                    f,
                    "  Most: {} on {} ({:.3}%)",
                    most,
                    Square::new(most_sq as u32),
                    self.percent(*most)
                )?;
                writeln!(
                    f,
                    "  Least: {} on {} ({:.3}%)",
                    least,
                    Square::new(least_sq as u32),
                    self.percent(*least)
                )?;
            }
        }

        writeln!(f, "Data health:")?;
        writeln!(
            f,
            "  Eval and WDL significantly incongruent: {} ({:.3}%)",
            self.incongruent,
            self.percent(self.incongruent)
        )?;
        write!(
            f,
            "  Eval near the bound: {} ({:.3}%)",
            self.near_bound,
            self.percent(self.near_bound)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_util::FENS;
    use crate::dataset::RecordWriter;
    use crate::record::parse_line;

    fn record(fen: &str, eval: i32, wdl: &str) -> PositionRecord {
        parse_line(&format!("{} | {} | {}", fen, eval, wdl)).unwrap()
    }

    #[test]
    fn test_three_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write_record(&record(FENS[0], 100, "1.0")).unwrap();
        writer.write_record(&record(FENS[1], -300, "0.5")).unwrap();
        writer.write_record(&record(FENS[3], 500, "0.0")).unwrap();
        writer.finish().unwrap();

        let stats = collect_stats(&path, &ProgressBar::hidden()).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.wdl, [1, 1, 1]);
        assert_eq!(stats.eval_min, -300);
        assert_eq!(stats.eval_max, 500);
        assert!((stats.eval_mean() - 100.0).abs() < 1e-9);
        // ((0)^2 + (-400)^2 + (400)^2) / 3
        assert!((stats.eval_variance() - 320000.0 / 3.0).abs() < 1e-6);

        assert_eq!(stats.pieces[32], 1);
        assert_eq!(stats.pieces[7], 1);
        assert_eq!(stats.phases[24], 1);
        assert_eq!(stats.white_kings[Square::E1 as usize], 1);
        assert_eq!(stats.white_kings[Square::G1 as usize], 1);
        assert_eq!(stats.black_kings[Square::C7 as usize], 1);
        assert!((stats.mean_fullmove() - 22.0).abs() < 1e-9);

        // 500 but lost
        assert_eq!(stats.incongruent, 1);
        assert_eq!(stats.near_bound, 0);

        let report = stats.to_string();
        assert!(report.starts_with("3 positions"));
        assert!(report.contains("Most: 1 on"));
    }

    #[test]
    fn test_health_metrics() {
        let mut stats = DatasetStats::default();
        stats.add(&record(FENS[0], 450, "0.5"));
        stats.add(&record(FENS[0], -250, "1.0"));
        stats.add(&record(FENS[0], 31900, "1.0"));
        stats.add(&record(FENS[0], 150, "0.0"));

        assert_eq!(stats.incongruent, 2);
        assert_eq!(stats.near_bound, 1);
    }

    #[test]
    fn test_decode_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let err = collect_stats(&path, &ProgressBar::hidden()).unwrap_err();
        assert_eq!(
            err.location(),
            Some(&crate::error::Location::Record(0))
        );
    }
}
