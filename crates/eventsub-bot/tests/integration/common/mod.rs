pub mod mock_eventsub;
