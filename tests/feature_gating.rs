#[test]
fn tracing_feature_gating_compiles() {
    #[cfg(feature = "tracing")]
    {
        tracing::event!(
            tracing::Level::DEBUG,
            event = "kvpipe.test.feature_gating",
            "kvpipe.test.feature_gating"
        );
    }

    #[cfg(not(feature = "tracing"))]
    {
        let marker = "tracing-disabled";
        assert_eq!(marker, "tracing-disabled");
    }
}

#[cfg(feature = "tracing")]
#[tokio::test]
async fn runs_under_a_subscriber() -> kvpipe::error::Result<()> {
    use kvpipe::pipeline::cancel::CancelToken;
    use kvpipe::pipeline::stream::Stream;
    use kvpipe::source::Items;

    let _guard = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_env_filter("kvpipe=trace")
            .with_test_writer()
            .finish(),
    );

    let total = Stream::new(Items::from_vec((0..20u32).collect()))
        .concurrency(3)
        .map(|pair| {
            let value = pair.value + 1;
            async move { Ok(value) }
        })
        .take(10)
        .reduce(&CancelToken::new(), 0u32, |acc, pair| acc + pair.value)
        .await?;

    assert!(total > 0);
    Ok(())
}
