use log::info;
use rustcorr::grouping::params::{CorrelationGroupingParams, FeatureShapeCorrelationParams, RtTolerance};
use rustcorr::grouping::row::{FeatureListRow, Sample};
use rustcorr::CorrelationGroupingTask;

fn main() -> rustcorr::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let samples = vec![Sample::new("s1"), Sample::new("s2"), Sample::new("s3")];
    let rows = vec![
        FeatureListRow::from_heights(1, 5.00, &samples, &[10.0, 12.0, 11.0]),
        FeatureListRow::from_heights(2, 5.02, &samples, &[9.0, 13.0, 10.0]),
        FeatureListRow::from_heights(3, 9.00, &samples, &[100.0, 90.0, 95.0]),
    ];

    let mut params = CorrelationGroupingParams {
        rt_tolerance: RtTolerance::absolute(0.05),
        min_height: 1.0,
        shape: FeatureShapeCorrelationParams::disabled(),
        ..CorrelationGroupingParams::default()
    };
    params.height.min_correlation = 0.5;
    params.height.min_samples = 3;

    let result = CorrelationGroupingTask::new(params).run_to_completion(&rows, &samples)?;
    for (group, summary) in result.groups.iter().zip(&result.summaries) {
        info!("group {}: rows {:?}, strength {:?}", group.id, group.rows, summary.strength());
        println!("{:?}", group.rows);
    }
    println!("{}", result.summary);
    Ok(())
}
